use anyhow::Result;
use eduroam_enroll::{config::Config, keygen::provision_realm, realm::OAuthClient};

// [business] Prints a provisioning record with a fresh realm CA and token secret
fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();
    let Some(realm) = args.get(1) else {
        eprintln!("Usage: {} <realm> [server-name...]", args[0]);
        std::process::exit(2);
    };

    // [business] The in-browser flow needs its client registered in every realm
    let defaults = Config::default();
    let browser = OAuthClient {
        client_id: defaults.browser_client_id,
        redirect_uris: vec![defaults.browser_redirect_uri],
        scopes: vec![defaults.certificate_scope],
    };

    let record = provision_realm(realm, args[2..].to_vec(), vec![browser])?;
    println!("{}", serde_json::to_string_pretty(&record)?);
    Ok(())
}
