//! LineBench - Inter-Core Latency Probe
//!
//! Measures how long a cache line takes to travel between two CPU cores.

fn main() -> anyhow::Result<()> {
    linebench_cli::run()
}
