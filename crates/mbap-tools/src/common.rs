use clap::Args;
use mbap_client::{ClientConfig, ClientError, ModbusTcpClient};
use std::time::Duration;

#[derive(Debug, Clone, Args)]
pub struct TcpConnectionArgs {
    #[arg(long, default_value = "127.0.0.1")]
    pub host: String,
    #[arg(long, default_value_t = 502)]
    pub port: u16,
    #[arg(long, default_value_t = 1)]
    pub unit_id: u8,
    /// Response timeout in milliseconds.
    #[arg(long, default_value_t = 5000)]
    pub timeout: u64,
}

impl TcpConnectionArgs {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn client_config(&self) -> ClientConfig {
        ClientConfig::default()
            .with_unit_id(self.unit_id)
            .with_response_timeout(Duration::from_millis(self.timeout))
    }
}

pub async fn build_client(args: &TcpConnectionArgs) -> Result<ModbusTcpClient, ClientError> {
    ModbusTcpClient::connect(args.address(), args.client_config()).await
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .try_init();
}

pub fn parse_bool(input: &str) -> Result<bool, String> {
    match input.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "on" | "yes" => Ok(true),
        "0" | "false" | "off" | "no" => Ok(false),
        _ => Err(format!("invalid bool value: {input}")),
    }
}

/// Parses `address=value`, as used to seed the simulator's banks.
pub fn parse_assignment(input: &str) -> Result<(u16, u16), String> {
    let (address, value) = input
        .split_once('=')
        .ok_or_else(|| format!("expected address=value, got {input}"))?;
    let address = address
        .trim()
        .parse()
        .map_err(|err| format!("invalid address in {input}: {err}"))?;
    let value = value.trim();
    let value = match value.strip_prefix("0x").or_else(|| value.strip_prefix("0X")) {
        Some(hex) => u16::from_str_radix(hex, 16),
        None => value.parse(),
    }
    .map_err(|err| format!("invalid value in {input}: {err}"))?;
    Ok((address, value))
}
