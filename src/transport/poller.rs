//! Poller (spec.md §4.3 "Poller").

use crate::channel::Channel;
use crate::error::{FlowMqError, FlowMqResult};
use std::collections::HashMap;

/// Constructed from a set of channels (or a map of `channel name -> list of
/// subchannels` plus an explicit order list) and polled for input/output
/// readiness.
pub struct Poller {
    order: Vec<(String, usize)>,
    index_of: HashMap<(String, usize), usize>,
    ready_input: Vec<bool>,
    ready_output: Vec<bool>,
}

impl Poller {
    /// Builds a poller over `channels`, one poll slot per `(name,
    /// subchannel_index)` pair named in `order`.
    pub fn new(channels: &HashMap<String, Vec<Channel>>, order: &[(String, usize)]) -> FlowMqResult<Self> {
        if order.is_empty() {
            return Err(FlowMqError::Poller {
                reason: "poller requires at least one channel entry".into(),
            });
        }
        let mut index_of = HashMap::new();
        for (i, key) in order.iter().enumerate() {
            let subchannels = channels.get(&key.0).ok_or_else(|| FlowMqError::Poller {
                reason: format!("unknown channel key: {}", key.0),
            })?;
            if key.1 >= subchannels.len() {
                return Err(FlowMqError::Poller {
                    reason: format!("unknown subchannel index {} for channel {}", key.1, key.0),
                });
            }
            index_of.insert(key.clone(), i);
        }
        let n = order.len();
        Ok(Self {
            order: order.to_vec(),
            index_of,
            ready_input: vec![false; n],
            ready_output: vec![false; n],
        })
    }

    /// Polls every channel slot for up to `timeout_ms` (`-1` forever, `0`
    /// try-once); returns the number of ready slots, or `Interrupted` if an
    /// FSM state change cancelled the poll before any slot became ready.
    pub fn poll(
        &mut self,
        channels: &HashMap<String, Vec<Channel>>,
        timeout_ms: i64,
        is_interrupted: impl Fn() -> bool,
    ) -> FlowMqResult<usize> {
        use crate::transport::socket::{poll_with_timeout, PollResult};

        let snapshot = |ready_in: &mut Vec<bool>, ready_out: &mut Vec<bool>| -> usize {
            let mut count = 0;
            for (i, (name, sub)) in self.order.iter().enumerate() {
                let chan = &channels[name][*sub];
                let has_in = chan.socket().map(|s| s.peer_count() > 0).unwrap_or(false);
                ready_in[i] = has_in;
                ready_out[i] = has_in;
                if has_in {
                    count += 1;
                }
            }
            count
        };

        let mut ready_in = self.ready_input.clone();
        let mut ready_out = self.ready_output.clone();
        let result = poll_with_timeout(
            timeout_ms,
            &is_interrupted,
            || {
                let count = snapshot(&mut ready_in, &mut ready_out);
                if count > 0 {
                    Some(count)
                } else {
                    None
                }
            },
        );
        self.ready_input = ready_in;
        self.ready_output = ready_out;
        match result {
            PollResult::Ready(n) => Ok(n),
            PollResult::TimedOut => Ok(0),
            PollResult::Interrupted => Err(FlowMqError::Poller {
                reason: "poll interrupted by state change".into(),
            }),
        }
    }

    pub fn check_input(&self, index: usize) -> bool {
        self.ready_input.get(index).copied().unwrap_or(false)
    }

    pub fn check_output(&self, index: usize) -> bool {
        self.ready_output.get(index).copied().unwrap_or(false)
    }

    pub fn check_input_named(&self, name: &str, subchannel: usize) -> FlowMqResult<bool> {
        let idx = self.resolve(name, subchannel)?;
        Ok(self.check_input(idx))
    }

    pub fn check_output_named(&self, name: &str, subchannel: usize) -> FlowMqResult<bool> {
        let idx = self.resolve(name, subchannel)?;
        Ok(self.check_output(idx))
    }

    fn resolve(&self, name: &str, subchannel: usize) -> FlowMqResult<usize> {
        self.index_of
            .get(&(name.to_string(), subchannel))
            .copied()
            .ok_or_else(|| FlowMqError::Poller {
                reason: format!("unknown channel key: {name}[{subchannel}]"),
            })
    }
}
