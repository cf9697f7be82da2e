//! hearth-plant: the plant runtime control core.
//!
//! Entity state machines (valve, pump, boiler/heat source, heating
//! circuit, DHW tank) and the plant aggregator that arbitrates their heat
//! requests, all driven by a single-threaded fixed-period control tick.
//!
//! Control flow per tick: DHW tanks → heating circuits → request
//! collection/arbitration → summer-maintenance evaluation → dispatch →
//! heat sources → valves → pumps. See [`plant::Plant::run`].

pub mod boiler;
pub mod ctx;
pub mod dhwt;
pub mod error;
pub mod hcircuit;
pub mod heatsource;
pub mod params;
pub mod pdata;
pub mod plant;
pub mod pump;
pub mod runtime;
pub mod valve;

pub use boiler::{Boiler, BoilerSet, IdleMode};
pub use ctx::{Actuators, TickCtx};
pub use dhwt::{ChargePrio, Dhwt, DhwtSet, ForceMode, LegionellaSet};
pub use error::{PlantError, PlantResult};
pub use hcircuit::{Hcircuit, HcircuitSet, TempLawBilinear, Transition};
pub use heatsource::{HeatSource, HeatSourceBackend, HeatSourceRun, HeatSourceSet};
pub use params::{DhwtParams, DhwtParamsOvr, HcircuitParams, HcircuitParamsOvr};
pub use pdata::PlantData;
pub use plant::{Plant, PlantSet, SummerMaint};
pub use pump::{Pump, PumpHandle, PumpSet};
pub use runtime::{Runtime, RuntimeConfig};
pub use valve::{MixAlgo, MixSet, PiSet, Valve, ValveKind, ValveMotor, ValveSet};
