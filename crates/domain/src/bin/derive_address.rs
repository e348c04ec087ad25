use std::env;
use std::process;

use forwarder_domain::credential::SigningCredential;

fn main() {
    let mut args = env::args().skip(1);
    let Some(private_key) = args.next().or_else(|| env::var("FORWARDER_PRIVATE_KEY").ok()) else {
        eprintln!("Usage: derive_address <private_key_hex> (or set FORWARDER_PRIVATE_KEY)");
        process::exit(1);
    };

    let credential = match SigningCredential::from_hex(&private_key) {
        Ok(credential) => credential,
        Err(err) => {
            eprintln!("failed to load private key: {err}");
            process::exit(1);
        }
    };

    println!("Address: {}", credential.address());
}
