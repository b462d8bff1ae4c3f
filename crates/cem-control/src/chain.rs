use crate::controller::{Controller, ControllerConfig};
use crate::ControlError;
use cem_devices::{Fleet, WRITE_OK};
use tracing::{debug, warn};

/// Aggregate of one chain run.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ChainOutcome {
    /// Last non-zero controller code, or 0.
    pub error_code: i32,
    /// Budget after the last controller; `None` for an empty chain.
    pub budget: Option<f64>,
    pub write_errors: u64,
}

/// Controllers in configured order. The order is the allocation priority.
#[derive(Debug, Clone, Default)]
pub struct ControllerChain {
    controllers: Vec<Controller>,
}

impl ControllerChain {
    pub fn new(controllers: Vec<Controller>) -> Self {
        Self { controllers }
    }

    pub fn from_configs(configs: &[ControllerConfig], fleet: &Fleet) -> Result<Self, ControlError> {
        let mut controllers = Vec::with_capacity(configs.len());
        for cfg in configs {
            if controllers.iter().any(|c: &Controller| c.name() == cfg.name) {
                return Err(ControlError::InvalidSettings {
                    controller: cfg.name.clone(),
                    reason: "duplicate controller name".to_string(),
                });
            }
            controllers.push(Controller::from_config(cfg, fleet)?);
        }
        Ok(Self { controllers })
    }

    pub fn controllers(&self) -> &[Controller] {
        &self.controllers
    }

    pub fn len(&self) -> usize {
        self.controllers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.controllers.is_empty()
    }

    /// Run every controller once, strictly in order, threading the budget.
    pub async fn run(&mut self, fleet: &Fleet) -> ChainOutcome {
        let mut out = ChainOutcome::default();
        for c in &mut self.controllers {
            let step = c.step(fleet, out.budget).await;
            if step.error_code != WRITE_OK {
                warn!(controller = %c.name(), error_code = step.error_code, "controller write failed");
                out.error_code = step.error_code;
                out.write_errors += 1;
            }
            out.budget = Some(step.budget);
        }
        debug!(budget = ?out.budget, error_code = out.error_code, "chain done");
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::{Mode, Policy, SwitchingSettings};
    use crate::testing::{device, FixedLibrary};
    use cem_devices::{Backend, Device, DeviceConfig, DeviceKind, WRITE_COMM_ERROR, WRITE_NO_BACKEND};

    fn cfg(name: &str, target: &str, policy: Policy) -> ControllerConfig {
        ControllerConfig {
            name: name.to_string(),
            policy,
            main_meter: "main".to_string(),
            device_meter: None,
            controlled_device: target.to_string(),
            switching: SwitchingSettings {
                threshold_kw: 1.0,
                hysteresis_kw: 0.3,
            },
        }
    }

    #[tokio::test]
    async fn budget_is_threaded_in_order() {
        let main = FixedLibrary::new(-5.0);
        let loads = FixedLibrary::new(0.0);
        let mut fleet = Fleet::new();
        fleet.add(device("main", DeviceKind::PowerSensor, &main, 0.0)).unwrap();
        fleet.add(device("hp", DeviceKind::HeatPump, &loads, 2.0)).unwrap();
        fleet.add(device("relay", DeviceKind::RelaisActuator, &loads, 2.5)).unwrap();
        fleet.add(device("ev", DeviceKind::EvCharger, &loads, 3.0)).unwrap();
        fleet.read_all(4).await;

        let mut chain = ControllerChain::from_configs(
            &[
                cfg("first", "hp", Policy::Switching),
                cfg("second", "relay", Policy::Switching),
                cfg("third", "ev", Policy::Switching),
            ],
            &fleet,
        )
        .unwrap();
        let out = chain.run(&fleet).await;
        let modes: Vec<_> = chain.controllers().iter().map(|c| c.mode()).collect();
        // 5.0 -> 3.0 after hp, 0.5 after relay; 0.5 is not enough for the charger
        assert_eq!(modes, vec![Mode::On, Mode::On, Mode::Off]);
        assert_eq!(chain.controllers()[2].excess(), 0.5);
        assert_eq!(out.budget, Some(0.5));
        assert_eq!(out.error_code, 0);
    }

    #[tokio::test]
    async fn last_nonzero_code_wins_and_chain_continues() {
        let main = FixedLibrary::new(-10.0);
        let loads = FixedLibrary::new(0.0);
        let mut fleet = Fleet::new();
        fleet.add(device("main", DeviceKind::PowerSensor, &main, 0.0)).unwrap();
        let ghost = DeviceConfig::new("ghost", DeviceKind::HeatPump).nominal_power(1.0);
        fleet.add(Device::new(ghost, Backend::None).unwrap()).unwrap();
        fleet.add(device("hp", DeviceKind::HeatPump, &loads, 2.0)).unwrap();
        fleet.read_all(4).await;

        let mut chain = ControllerChain::from_configs(
            &[cfg("a", "ghost", Policy::Switching), cfg("b", "hp", Policy::Switching)],
            &fleet,
        )
        .unwrap();
        let out = chain.run(&fleet).await;
        assert_eq!(out.error_code, WRITE_NO_BACKEND);
        assert_eq!(out.write_errors, 1);
        assert_eq!(chain.controllers()[1].mode(), Mode::On);
        assert_eq!(out.budget, Some(7.0));
    }

    #[tokio::test]
    async fn crashing_client_does_not_starve_later_controllers() {
        let main = FixedLibrary::new(-10.0);
        let broken = FixedLibrary::crashing_on_write(0.0);
        let loads = FixedLibrary::new(0.0);
        let mut fleet = Fleet::new();
        fleet.add(device("main", DeviceKind::PowerSensor, &main, 0.0)).unwrap();
        fleet.add(device("broken", DeviceKind::HeatPump, &broken, 1.0)).unwrap();
        fleet.add(device("hp", DeviceKind::HeatPump, &loads, 2.0)).unwrap();
        fleet.read_all(4).await;

        let mut chain = ControllerChain::from_configs(
            &[cfg("a", "broken", Policy::Switching), cfg("b", "hp", Policy::Switching)],
            &fleet,
        )
        .unwrap();
        let out = chain.run(&fleet).await;
        assert_eq!(out.error_code, WRITE_COMM_ERROR);
        assert_eq!(out.write_errors, 1);
        assert_eq!(out.budget, Some(7.0));
        assert_eq!(chain.controllers()[0].mode(), Mode::On);
        assert_eq!(chain.controllers()[1].mode(), Mode::On);
        assert_eq!(loads.writes().len(), 1);

        // the failed switch is not retried while the mode holds
        let out = chain.run(&fleet).await;
        assert_eq!(out.error_code, 0);
        assert_eq!(loads.writes().len(), 1);
    }

    #[test]
    fn duplicate_controller_names_are_rejected() {
        let main = FixedLibrary::new(0.0);
        let mut fleet = Fleet::new();
        fleet.add(device("main", DeviceKind::PowerSensor, &main, 0.0)).unwrap();
        fleet.add(device("hp", DeviceKind::HeatPump, &main, 2.0)).unwrap();
        let err = ControllerChain::from_configs(
            &[cfg("a", "hp", Policy::Switching), cfg("a", "hp", Policy::Dynamic)],
            &fleet,
        )
        .unwrap_err();
        assert!(matches!(err, ControlError::InvalidSettings { .. }));
    }

    #[tokio::test]
    async fn empty_chain_has_no_budget() {
        let fleet = Fleet::new();
        let out = ControllerChain::default().run(&fleet).await;
        assert_eq!(out, ChainOutcome::default());
    }
}
