//! Maps the `-p <module>` CLI flag (§6.1) onto the static registry of known
//! startup plug-ins — `"state"` and `"thermal"` today (§3 Design Note: a sum
//! type of statically linked modules replaces the original's `dlopen`ed
//! shared objects; an unrecognized name is a fatal configuration error,
//! matching the source's "unknown startup module" case).

use crate::WorkerError;
use dsme_bus::Bus;
use dsme_state::{StateHandle, StateMachine, StateModule};
use dsme_thermal::{ThermalHandle, ThermalManager, ThermalModule};
use tracing::info;

/// Handles kept by the owning binary to drive a loaded module's timers,
/// independent of the `Box<dyn PolicyModule>` the bus owns.
#[derive(Default, Clone)]
pub struct ModuleHandles {
    pub state: Option<StateHandle>,
    pub thermal: Option<ThermalHandle>,
}

/// Load every module named on the command line, each at priority 0 in the
/// order given (§4.3: equal-priority handlers sort by insertion order,
/// which is the command-line order for startup modules).
pub fn load_requested(
    bus: &mut Bus,
    names: &[String],
    bootstate: Option<&str>,
    rd_mode: bool,
) -> Result<ModuleHandles, WorkerError> {
    let mut handles = ModuleHandles::default();
    for name in names {
        match name.as_str() {
            "state" => {
                let machine = StateMachine::new(bootstate, rd_mode)?;
                let (module, handle) = StateModule::new(machine);
                bus.load_module(Box::new(module), 0);
                handles.state = Some(handle);
                info!("loaded startup module \"state\"");
            }
            "thermal" => {
                let (module, handle) = ThermalModule::new(ThermalManager::new());
                bus.load_module(Box::new(module), 0);
                handles.thermal = Some(handle);
                info!("loaded startup module \"thermal\"");
            }
            other => return Err(WorkerError::UnknownModule(other.to_string())),
        }
    }
    Ok(handles)
}
