//! Leader-aware request routing.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

use common::{Error, Result};
use protocol::ServerInfo;

/// Partitions the resolved servers into one leader and N followers and
/// picks a target per request.
///
/// Produce requests must hit the leader (only it may apply); Consume
/// requests spread round-robin over the followers to offload the leader,
/// falling back to the leader when there are none.
#[derive(Default)]
pub struct Picker {
    state: RwLock<State>,
    current: AtomicU64,
}

#[derive(Default)]
struct State {
    leader: Option<String>,
    followers: Vec<String>,
}

impl Picker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Re-partition from a fresh server list.
    pub fn update(&self, servers: &[ServerInfo]) {
        let mut state = self.state.write().unwrap();
        state.leader = servers
            .iter()
            .find(|s| s.is_leader)
            .map(|s| s.rpc_addr.clone());
        state.followers = servers
            .iter()
            .filter(|s| !s.is_leader)
            .map(|s| s.rpc_addr.clone())
            .collect();
    }

    /// Pick the address to send a request to, by method name.
    pub fn pick(&self, method: &str) -> Result<String> {
        let state = self.state.read().unwrap();

        if method.contains("Produce") || state.followers.is_empty() {
            state
                .leader
                .clone()
                .ok_or_else(|| Error::Transport(format!("no server available for {method}")))
        } else if method.contains("Consume") {
            let current = self.current.fetch_add(1, Ordering::Relaxed) + 1;
            let index = (current % state.followers.len() as u64) as usize;
            Ok(state.followers[index].clone())
        } else {
            Err(Error::Transport(format!("no server available for {method}")))
        }
    }
}
