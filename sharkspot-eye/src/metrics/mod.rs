//! Host and throughput metrics

pub mod probe;
pub mod sampler;

pub use probe::{parse_proc_stat, CpuTicks, HostProbe, SystemProbe};
pub use sampler::{MetricsSampler, PredictionBuffer};

#[cfg(test)]
pub use probe::MockSystemProbe;
