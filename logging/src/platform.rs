/// An external session or presence integration (a store client, a chat
/// overlay) whose state is worth recording when the process crashes.
pub trait PlatformSession: Send + Sync {
  fn is_active(&self) -> bool;

  fn user_name(&self) -> Option<String>;

  fn user_id(&self) -> Option<String>;
}

/// Used when the application has no platform integration.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoPlatformSession;

impl PlatformSession for NoPlatformSession {
  fn is_active(&self) -> bool {
    false
  }

  fn user_name(&self) -> Option<String> {
    None
  }

  fn user_id(&self) -> Option<String> {
    None
  }
}
