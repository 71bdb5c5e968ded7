use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "stream-player", version)]
pub struct Args {
    /// List output devices and exit
    #[arg(long)]
    pub list_devices: bool,

    /// Use a specific output device by substring match
    #[arg(long)]
    pub device: Option<String>,

    /// Source sample rate in Hz
    #[arg(long, default_value_t = 16_000)]
    pub sample_rate: u32,

    /// Test tone frequency in Hz
    #[arg(long, default_value_t = 440.0)]
    pub frequency: f64,

    /// Number of reusable hardware buffers in the pool
    #[arg(long, default_value_t = 3)]
    pub buffers: usize,

    /// Target per-buffer latency in milliseconds
    #[arg(long, default_value_t = 40)]
    pub latency_ms: u64,

    /// Producer chunk size in milliseconds
    #[arg(long, default_value_t = 20)]
    pub chunk_ms: u64,

    /// Play for this many seconds then stop (0 = until Ctrl-C)
    #[arg(long, default_value_t = 0)]
    pub seconds: u64,
}
