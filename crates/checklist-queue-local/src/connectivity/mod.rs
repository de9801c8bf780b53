mod probe;

pub use probe::ProbeMonitor;
