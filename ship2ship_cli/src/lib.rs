//! ship2ship command line support: synthetic traffic and file ingest.

pub mod fleet;
pub mod io;

pub use fleet::{FleetConfig, FleetSimulator, SimulatedVessel};
pub use io::{read_pings_jsonl, read_ports, write_pings_jsonl, PingImport};
