pub mod channel;
pub mod reconnect;

pub use channel::{ChannelConfig, ChannelError, ChannelEvent, SessionChannel};
pub use reconnect::{ReconnectPhase, ReconnectPolicy, ReconnectPolicyConfig};
