//! Parallel time estimation over all modes

use gcodestat_core::{CustomGCodeType, TimeMode};
use gcodestat_settings::PrintConfig;

use super::machine::{PlannedMove, TimeMachine};

/// One [`TimeMachine`] per [`TimeMode`], driven in lockstep
///
/// The normal machine is always enabled. The stealth machine runs only when
/// the stealth estimator is enabled in the configuration.
#[derive(Debug, Clone)]
pub struct TimeEstimator {
    machines: [TimeMachine; TimeMode::COUNT],
    machine_envelope_processing: bool,
    extruder_unloaded: bool,
}

impl TimeEstimator {
    pub fn new(config: &PrintConfig) -> Self {
        Self {
            machines: [
                TimeMachine::new(config, TimeMode::Normal, true),
                TimeMachine::new(
                    config,
                    TimeMode::Stealth,
                    config.enable_stealth_time_estimator,
                ),
            ],
            machine_envelope_processing: config.enable_machine_envelope_processing,
            extruder_unloaded: true,
        }
    }

    pub fn machine(&self, mode: TimeMode) -> &TimeMachine {
        &self.machines[mode.index()]
    }

    pub fn machine_mut(&mut self, mode: TimeMode) -> &mut TimeMachine {
        &mut self.machines[mode.index()]
    }

    /// Enabled machines
    pub fn machines(&self) -> impl Iterator<Item = &TimeMachine> {
        self.machines.iter().filter(|m| m.is_enabled())
    }

    /// Enabled machines, mutably
    pub fn machines_mut(&mut self) -> impl Iterator<Item = &mut TimeMachine> {
        self.machines.iter_mut().filter(|m| m.is_enabled())
    }

    /// Machines whose limits follow M201/M203/M204/M205/M566
    ///
    /// The stealth machine only follows them when machine envelope
    /// processing is enabled.
    pub fn limit_targets_mut(&mut self) -> impl Iterator<Item = &mut TimeMachine> {
        let envelope = self.machine_envelope_processing;
        self.machines
            .iter_mut()
            .filter(move |m| m.mode() == TimeMode::Normal || envelope)
    }

    pub fn is_extruder_unloaded(&self) -> bool {
        self.extruder_unloaded
    }

    pub fn set_extruder_unloaded(&mut self, unloaded: bool) {
        self.extruder_unloaded = unloaded;
    }

    pub fn plan_move(&mut self, planned: &PlannedMove) {
        for machine in self.machines_mut() {
            machine.plan_move(planned);
        }
    }

    /// Flush every machine and charge `additional_time` to `layer_id`
    pub fn simulate_st_synchronize(&mut self, additional_time: f64, layer_id: usize) {
        for machine in self.machines_mut() {
            machine.simulate_st_synchronize(additional_time, layer_id);
        }
    }

    pub fn process_custom_gcode_time(&mut self, kind: CustomGCodeType) {
        for machine in self.machines_mut() {
            machine.process_custom_gcode_time(kind);
        }
    }

    pub fn request_checkpoint(&mut self, line_id: usize) {
        for machine in self.machines_mut() {
            machine.request_checkpoint(line_id);
        }
    }

    pub fn finalize(&mut self) {
        for machine in self.machines_mut() {
            machine.finalize();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gcodestat_core::{AxisPosition, ExtrusionRole, MoveType};

    fn travel() -> PlannedMove {
        PlannedMove {
            move_type: MoveType::Travel,
            role: ExtrusionRole::None,
            line_id: 1,
            move_id: 0,
            layer_id: 1,
            delta: AxisPosition([10.0, 0.0, 0.0, 0.0]),
            feedrate: 50.0,
        }
    }

    #[test]
    fn test_stealth_disabled_by_default() {
        let mut estimator = TimeEstimator::new(&PrintConfig::default());
        estimator.plan_move(&travel());
        estimator.finalize();
        assert!(estimator.machine(TimeMode::Normal).time() > 0.0);
        assert_eq!(estimator.machine(TimeMode::Stealth).time(), 0.0);
        assert_eq!(estimator.machines().count(), 1);
    }

    #[test]
    fn test_modes_are_independent() {
        let mut config = PrintConfig::default();
        config.enable_stealth_time_estimator = true;
        let mut estimator = TimeEstimator::new(&config);
        estimator.plan_move(&travel());
        estimator.simulate_st_synchronize(1.0, 1);
        estimator.finalize();

        let normal = estimator.machine(TimeMode::Normal).time();
        let stealth = estimator.machine(TimeMode::Stealth).time();
        assert!(normal > 1.0);
        // default stealth accelerations are lower
        assert!(stealth > normal);
    }

    #[test]
    fn test_limit_targets_follow_envelope_flag() {
        let mut config = PrintConfig::default();
        config.enable_stealth_time_estimator = true;
        config.enable_machine_envelope_processing = false;
        let mut estimator = TimeEstimator::new(&config);
        assert_eq!(estimator.limit_targets_mut().count(), 1);

        config.enable_machine_envelope_processing = true;
        let mut estimator = TimeEstimator::new(&config);
        assert_eq!(estimator.limit_targets_mut().count(), 2);
    }
}
