use clap::Parser;
use mbap_tools::common::{build_client, init_tracing, TcpConnectionArgs};

#[derive(Debug, Parser)]
#[command(name = "readcoils", about = "Read coils (FC01) or discrete inputs (FC02)")]
struct Args {
    #[command(flatten)]
    conn: TcpConnectionArgs,
    #[arg(long)]
    start: u16,
    #[arg(long)]
    quantity: u16,
    /// Read discrete inputs instead of coils.
    #[arg(long)]
    discrete: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();
    let args = Args::parse();
    let client = build_client(&args.conn).await?;

    let values = if args.discrete {
        client.read_discrete_inputs(args.start, args.quantity).await?
    } else {
        client.read_coils(args.start, args.quantity).await?
    };

    let label = if args.discrete { "input" } else { "coil" };
    for (idx, value) in values.iter().enumerate() {
        println!("{label}={} value={}", args.start + idx as u16, value);
    }
    Ok(())
}
