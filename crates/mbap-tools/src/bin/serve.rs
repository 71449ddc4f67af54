use clap::Parser;
use mbap_server::{DataStoreConfig, ModbusTcpServer, ServerConfig, SharedDataStore};
use mbap_tools::common::{init_tracing, parse_assignment};
use tracing::info;

#[derive(Debug, Parser)]
#[command(name = "mbap-serve", about = "Serve an in-memory Modbus/TCP unit")]
struct Args {
    #[arg(long, default_value = "127.0.0.1:502")]
    bind: String,
    #[arg(long, default_value_t = 1)]
    unit_id: u8,
    #[arg(long, default_value_t = 8)]
    max_connections: usize,
    #[arg(long, default_value_t = 64)]
    coils: usize,
    #[arg(long, default_value_t = 64)]
    discrete_inputs: usize,
    #[arg(long, default_value_t = 64)]
    holding_registers: usize,
    #[arg(long, default_value_t = 64)]
    input_registers: usize,
    /// Initial holding register, as `address=value`. Repeatable.
    #[arg(long = "holding", value_parser = parse_assignment)]
    holding: Vec<(u16, u16)>,
    /// Initial input register, as `address=value`. Repeatable.
    #[arg(long = "input", value_parser = parse_assignment)]
    input: Vec<(u16, u16)>,
    /// Coil addresses to start switched on.
    #[arg(long = "coil-on", value_delimiter = ',')]
    coils_on: Vec<u16>,
    /// Discrete input addresses to start set.
    #[arg(long = "input-on", value_delimiter = ',')]
    inputs_on: Vec<u16>,
}

impl Args {
    fn server_config(&self) -> ServerConfig {
        ServerConfig::default()
            .with_unit_id(self.unit_id)
            .with_max_connections(self.max_connections)
            .with_store(DataStoreConfig {
                coils: self.coils,
                discrete_inputs: self.discrete_inputs,
                holding_registers: self.holding_registers,
                input_registers: self.input_registers,
            })
    }

    fn seed(&self, store: &SharedDataStore) -> Result<(), Box<dyn std::error::Error>> {
        for &(address, value) in &self.holding {
            store.set_holding_register(address, value)?;
        }
        for &(address, value) in &self.input {
            store.set_input_register(address, value)?;
        }
        for &address in &self.coils_on {
            store.set_coil(address, true)?;
        }
        for &address in &self.inputs_on {
            store.set_discrete_input(address, true)?;
        }
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();
    let args = Args::parse();

    let config = args.server_config();
    let store = SharedDataStore::with_config(&config.store);
    args.seed(&store)?;

    let server = ModbusTcpServer::bind(args.bind.as_str(), config, store).await?;
    info!(
        addr = %server.local_addr()?,
        unit_id = args.unit_id,
        "modbus tcp simulator listening"
    );

    tokio::select! {
        result = server.run() => result?,
        _ = tokio::signal::ctrl_c() => info!("shutting down"),
    }
    Ok(())
}
