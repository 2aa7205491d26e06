use anyhow::Result;
use eduroam_enroll::{config::Config, realm::RealmStore as _, Backends};

// [business] Prints every RADIUS server name of every realm, one per line
#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();
    if args.len() > 1 {
        eprintln!("Usage: {}", args[0]);
        std::process::exit(2);
    }

    let config = Config::from_env()?;
    let backends = Backends::connect(&config).await?;

    for name in backends.realms.list_server_names().await? {
        println!("{}", name);
    }
    Ok(())
}
