//! Device Runtime (component F, spec.md §4.6): orchestrates the FSM loop,
//! invokes user hooks, owns channels and transports.

pub mod control;
pub mod hooks;

pub use control::DeviceControl;
pub use hooks::{DeviceHooks, NoopHooks, RateLimiter};

use crate::channel::{Channel, Method};
use crate::error::{FlowMqError, FlowMqResult};
use crate::property::PropertyStore;
use crate::state_machine::{State, StateMachine, Transition};
use crate::transport::{Transport, TransportTag};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// What a hook sees: the property store, the device's channel map, and its
/// resolved transports. Hooks never see the FSM or control token directly —
/// only `Device` drives those. Channels sit behind a `Mutex` so the runtime
/// can bind/connect them from `&self` while hooks are also free to send and
/// receive on them.
pub struct DeviceContext {
    pub properties: PropertyStore,
    channels: HashMap<String, Vec<Mutex<Channel>>>,
    transports: HashMap<TransportTag, Arc<dyn Transport>>,
}

impl DeviceContext {
    pub fn with_channel<R>(&self, name: &str, subchannel: usize, f: impl FnOnce(&mut Channel) -> R) -> Option<R> {
        let mut guard = self.channels.get(name)?.get(subchannel)?.lock();
        Some(f(&mut guard))
    }

    pub fn channel_names(&self) -> impl Iterator<Item = &str> {
        self.channels.keys().map(|s| s.as_str())
    }

    pub fn subchannel_count(&self, name: &str) -> usize {
        self.channels.get(name).map_or(0, |v| v.len())
    }

    pub fn transport(&self, tag: TransportTag) -> Option<&Arc<dyn Transport>> {
        self.transports.get(&tag)
    }
}

/// A device: one FSM, one property store, a map of channels, a set of
/// transports keyed by tag, and the hooks driving each state.
pub struct Device {
    fsm: Arc<StateMachine>,
    control: Arc<DeviceControl>,
    context: DeviceContext,
    hooks: Arc<dyn DeviceHooks>,
    interrupted: Arc<AtomicBool>,
}

impl Device {
    pub fn new(properties: PropertyStore, hooks: Arc<dyn DeviceHooks>) -> Self {
        Self {
            fsm: Arc::new(StateMachine::new()),
            control: Arc::new(DeviceControl::new()),
            context: DeviceContext {
                properties,
                channels: HashMap::new(),
                transports: HashMap::new(),
            },
            hooks,
            interrupted: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn fsm(&self) -> &Arc<StateMachine> {
        &self.fsm
    }

    pub fn control(&self) -> &Arc<DeviceControl> {
        &self.control
    }

    pub fn register_transport(&mut self, tag: TransportTag, transport: Arc<dyn Transport>) {
        self.context.transports.insert(tag, transport);
    }

    pub fn add_channel(&mut self, channel: Channel) {
        self.context
            .channels
            .entry(channel.name().to_string())
            .or_default()
            .push(Mutex::new(channel));
    }

    /// `ChangeDeviceState`: succeeds only for the holding controller (or
    /// anyone, if the device is uncontrolled).
    pub fn change_state(&self, controller_id: Option<&str>, input: Transition) -> FlowMqResult<State> {
        self.control.authorize(controller_id)?;
        self.fsm.change_state(input)
    }

    /// The emergency path: seizes control and drives the FSM to `Exiting`
    /// regardless of who currently holds it.
    pub fn interrupt_and_exit(&self, controller_id: impl Into<String>) -> FlowMqResult<()> {
        let controller_id = controller_id.into();
        self.control.steal(controller_id.clone());
        self.interrupted.store(true, Ordering::SeqCst);
        self.fsm.change_state(Transition::End)?;
        Ok(())
    }

    /// Runs the FSM-driving loop on the current thread until `Exiting` or
    /// `Error` is reached. Each state's framework action runs, then the
    /// user hook, then the interrupt flag is cleared before the next state.
    /// Per spec.md §4.5, `ErrorFound` causes this loop to exit after its
    /// callback has run, the same as reaching `Exiting` does.
    pub fn run(&self) -> FlowMqResult<()> {
        loop {
            let Some(state) = self.fsm.wait_next(None) else {
                continue;
            };
            self.interrupted.store(true, Ordering::SeqCst);
            let result = self.drive(state);
            self.interrupted.store(false, Ordering::SeqCst);
            result?;
            if state == State::Exiting || state == State::Error {
                return Ok(());
            }
        }
    }

    fn drive(&self, state: State) -> FlowMqResult<()> {
        match state {
            State::InitializingDevice => {
                tracing::info!("initializing device: registering channel endpoints");
                self.hooks.init(&self.context)
            }
            State::Binding => {
                self.for_each_channel_with_method(Method::Bind, |channel, transport| channel.bind(transport))?;
                self.hooks.bind(&self.context)
            }
            State::Connecting => {
                self.for_each_channel_with_method(Method::Connect, |channel, transport| channel.connect(transport))?;
                self.hooks.connect(&self.context)
            }
            State::InitializingTask => self.hooks.init_task(&self.context),
            State::Running => self.run_loop(),
            State::ResettingTask => self.hooks.reset_task(&self.context),
            State::ResettingDevice => {
                tracing::info!("resetting device: closing channels, releasing transports");
                self.hooks.reset(&self.context)
            }
            State::Exiting => Ok(()),
            State::Error => {
                tracing::error!("device entered the error state, exiting the run loop");
                Ok(())
            }
            other => {
                tracing::debug!(state = ?other, "state has no device-runtime action");
                Ok(())
            }
        }
    }

    fn run_loop(&self) -> FlowMqResult<()> {
        self.hooks.pre_run(&self.context)?;
        loop {
            if self.fsm.next_state_pending() {
                break;
            }
            self.hooks.run(&self.context)?;
            if !self.hooks.conditional_run(&self.context)? {
                break;
            }
        }
        self.hooks.post_run(&self.context)
    }

    fn require_transport(&self, tag: TransportTag) -> FlowMqResult<&Arc<dyn Transport>> {
        self.context
            .transports
            .get(&tag)
            .ok_or_else(|| FlowMqError::Transport {
                reason: format!("no transport registered for {tag}"),
            })
    }

    /// Validates and binds/connects every channel whose configured method
    /// matches `method`, in the spec.md §4.6 Binding/Connecting state actions.
    fn for_each_channel_with_method(
        &self,
        method: Method,
        action: impl Fn(&mut Channel, &dyn Transport) -> FlowMqResult<()>,
    ) -> FlowMqResult<()> {
        for (name, subchannels) in &self.context.channels {
            for (index, slot) in subchannels.iter().enumerate() {
                let mut channel = slot.lock();
                if channel.config().method != Some(method) {
                    continue;
                }
                let tag = channel.config().transport;
                let transport = self.require_transport(tag)?;
                channel.validate()?;
                action(&mut channel, transport.as_ref()).map_err(|e| {
                    tracing::error!(channel = %name, subchannel = index, error = %e, "channel setup failed");
                    e
                })?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::property::PropertyStore;
    use std::sync::atomic::AtomicUsize;

    struct CountingHooks {
        runs: AtomicUsize,
        max_runs: usize,
    }

    impl DeviceHooks for CountingHooks {
        fn run(&self, _ctx: &DeviceContext) -> FlowMqResult<()> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn conditional_run(&self, _ctx: &DeviceContext) -> FlowMqResult<bool> {
            Ok(self.runs.load(Ordering::SeqCst) < self.max_runs)
        }
    }

    #[test]
    fn change_state_is_rejected_for_the_wrong_controller() {
        let device = Device::new(PropertyStore::new(), Arc::new(NoopHooks));
        device.control().take("owner").unwrap();
        assert!(device.change_state(Some("intruder"), Transition::InitDevice).is_err());
        assert!(device.change_state(Some("owner"), Transition::InitDevice).is_ok());
    }

    #[test]
    fn uncontrolled_device_accepts_any_caller() {
        let device = Device::new(PropertyStore::new(), Arc::new(NoopHooks));
        assert!(device.change_state(Some("anyone"), Transition::InitDevice).is_ok());
    }

    #[test]
    fn run_drains_queued_transitions_and_stops_at_exiting() {
        let device = Device::new(
            PropertyStore::new(),
            Arc::new(CountingHooks {
                runs: AtomicUsize::new(0),
                max_runs: 3,
            }),
        );
        let fsm = device.fsm().clone();
        fsm.change_state(Transition::InitDevice).unwrap();
        fsm.change_state(Transition::CompleteInit).unwrap();
        fsm.change_state(Transition::Bind).unwrap();
        fsm.change_state(Transition::Connect).unwrap();
        fsm.change_state(Transition::InitTask).unwrap();
        fsm.change_state(Transition::Run).unwrap();
        fsm.change_state(Transition::Stop).unwrap();
        fsm.change_state(Transition::ResetTask).unwrap();
        fsm.change_state(Transition::ResetDevice).unwrap();
        fsm.change_state(Transition::End).unwrap();
        device.run().unwrap();
        assert_eq!(device.fsm().current_state(), State::Exiting);
    }

    #[test]
    fn run_exits_on_error_found_instead_of_hanging() {
        let device = Device::new(PropertyStore::new(), Arc::new(NoopHooks));
        let fsm = device.fsm().clone();
        fsm.change_state(Transition::InitDevice).unwrap();
        fsm.change_state(Transition::ErrorFound).unwrap();
        device.run().unwrap();
        assert_eq!(device.fsm().current_state(), State::Error);
    }

    #[test]
    fn interrupt_and_exit_overrides_any_controller() {
        let device = Device::new(PropertyStore::new(), Arc::new(NoopHooks));
        device.control().take("owner").unwrap();
        device.interrupt_and_exit("operator").unwrap();
        assert_eq!(device.control().current_owner(), Some("operator".to_string()));
        assert_eq!(device.fsm().last_queued_state(), State::Exiting);
    }

    #[test]
    fn binding_state_actually_binds_configured_channels() {
        use crate::channel::ChannelConfig;
        use crate::transport::default_transport::DefaultTransport;
        use crate::transport::socket::SocketKind;

        let mut device = Device::new(PropertyStore::new(), Arc::new(NoopHooks));
        device.register_transport(TransportTag::Default, Arc::new(DefaultTransport::new()));

        let mut config = ChannelConfig::new("data", 0, SocketKind::Pull);
        config.method = Some(Method::Bind);
        config.address = Some("inproc://device_binds_its_channels".into());
        device.add_channel(Channel::new(config));

        let fsm = device.fsm().clone();
        fsm.change_state(Transition::InitDevice).unwrap();
        fsm.change_state(Transition::CompleteInit).unwrap();
        fsm.change_state(Transition::Bind).unwrap();
        fsm.change_state(Transition::Connect).unwrap();
        fsm.change_state(Transition::InitTask).unwrap();
        fsm.change_state(Transition::Run).unwrap();
        fsm.change_state(Transition::Stop).unwrap();
        fsm.change_state(Transition::ResetTask).unwrap();
        fsm.change_state(Transition::ResetDevice).unwrap();
        fsm.change_state(Transition::End).unwrap();
        device.run().unwrap();

        let bound = device.context.with_channel("data", 0, |ch| ch.socket().is_some());
        assert_eq!(bound, Some(true));
    }
}
