use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use rand::Rng;
use tracing::{info, warn};

use fleet_module::identity::HardwareType;
use fleet_module::{Facade, ModuleClient, ModuleConfig, ModuleIdentity, UdpTransport, logging, protocol};

const USAGE: &str = "Usage: fleet_client <module_name> <broker_port> <listen_port> [config.json]\n\
                     e.g. fleet_client RS_Plugin 60000 61233";

fn generate_module_key() -> String {
    let mut rng = rand::rng();
    (0..12)
        .map(|_| char::from(b'0' + rng.random_range(0..10u8)))
        .collect()
}

fn load_config(args: &[String]) -> Result<ModuleConfig> {
    let broker_port: u16 = args[2]
        .parse()
        .with_context(|| format!("Invalid broker port '{}'", args[2]))?;
    let listen_port: u16 = args[3]
        .parse()
        .with_context(|| format!("Invalid listen port '{}'", args[3]))?;

    let mut config = match args.get(4) {
        Some(path) => ModuleConfig::load_or_default(Path::new(path)),
        None => ModuleConfig::default(),
    };
    config.broker_addr.set_port(broker_port);
    config.listen_addr.set_port(listen_port);
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    logging::init_logging("info,fleet_module=debug")?;

    let args: Vec<String> = std::env::args().collect();
    if args.len() < 4 {
        bail!("Insufficient arguments. {USAGE}");
    }
    let module_name = &args[1];
    let config = load_config(&args)?;

    let mut identity = ModuleIdentity::new(
        protocol::CLASS_GENERIC,
        module_name.as_str(),
        generate_module_key(),
        "0.0.1",
        Vec::new(),
    );
    identity.add_feature(protocol::FEATURE_SENDING_TELEMETRY);
    identity.add_feature(protocol::FEATURE_RECEIVING_TELEMETRY);
    identity.set_hardware("123456", HardwareType::Cpu);

    let client = Arc::new(ModuleClient::new(identity));
    client.on_message(|msg| {
        info!("Received {} bytes: {}", msg.len(), msg.json);
    });

    let transport = Arc::new(UdpTransport::bind(config, client.receive_callback()).await?);
    transport.start()?;
    client.attach(transport.clone())?;
    info!("Module '{module_name}' running");

    let facade = Facade::new(&client);
    let mut ticker = tokio::time::interval(Duration::from_secs(1));
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                info!("Module running ({})", client.connection_state());
                if let Err(e) = facade.send_error_message(
                    "",
                    u32::from(protocol::NOTIFICATION_NOTICE),
                    protocol::ERROR_USER_DEFINED,
                    protocol::NOTIFICATION_INFO,
                    "Hello from rust",
                ) {
                    warn!("Send failed: {e}");
                }
            }
            _ = &mut shutdown => {
                info!("Ctrl-C received, shutting down");
                break;
            }
        }
    }

    transport.stop();
    Ok(())
}
