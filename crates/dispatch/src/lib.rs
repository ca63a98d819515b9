//! Multi-backend tool dispatch for Cortex.
//!
//! The [`Dispatcher`] connects to any number of independently running tool
//! backends, discovers what each one offers, merges everything into a single
//! tool namespace and forwards calls by name:
//!
//! 1. **Connect** every configured backend concurrently (pipe or stream)
//! 2. **Handshake** (`initialize`, `notifications/initialized`)
//! 3. **Discover** tools with `tools/list`
//! 4. **Merge** names, applying the collision policy
//! 5. **Invoke** by name, turning every failure into a `ToolResult`
//!
//! A backend that fails at any step is isolated; the rest keep working.

pub mod connection;
pub mod dispatcher;
pub mod peer;
pub mod session;
pub mod transport;

#[cfg(test)]
pub(crate) mod test_helpers;

pub use connection::BackendConnection;
pub use dispatcher::{Dispatcher, DispatcherSettings};
pub use peer::RpcPeer;
pub use session::{McpSession, TransportConnector};
pub use transport::Transport;
