//! Bridge Key Tooling
//!
//! Offline helpers for operators and clients. Needs no RPC endpoint or
//! database.
//!
//! Usage:
//!   bridge-keys mnemonic
//!   bridge-keys xpub
//!   bridge-keys index <destination> [nonce]
//!   bridge-keys verify <deposit_address> <destination> [nonce]

use hdbridge::derivation::{
    calculate_index, derive_address_from_xpub, derive_deposit_address,
    derive_public_extended_key, generate_mnemonic, parse_address, parse_nonce,
    verify_deposit_address, BridgeSeed,
};
use std::env;

fn main() {
    dotenv::dotenv().ok();
    let args: Vec<String> = env::args().collect();

    if args.len() < 2 {
        print_usage();
        return;
    }

    let result = match args[1].as_str() {
        "mnemonic" => cmd_mnemonic(),
        "xpub" => cmd_xpub(),
        "index" => cmd_index(&args[2..]),
        "verify" => cmd_verify(&args[2..]),
        "help" | "--help" | "-h" => {
            print_usage();
            Ok(())
        }
        _ => {
            print_usage();
            Ok(())
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn print_usage() {
    println!("Bridge Key Tooling");
    println!();
    println!("Usage:");
    println!("  bridge-keys mnemonic                                     Generate a testnet mnemonic");
    println!("  bridge-keys xpub                                         Print the account xpub");
    println!("  bridge-keys index <destination> [nonce]                  Derivation index and deposit address");
    println!("  bridge-keys verify <deposit_address> <destination> [nonce]");
    println!("                                                           Check a deposit address against the xpub");
    println!();
    println!("Environment Variables:");
    println!("  BRIDGE_MNEMONIC   BIP-39 phrase (xpub; index fallback)");
    println!("  BRIDGE_XPUB       Account xpub (index, verify)");
}

type CmdResult = Result<(), String>;

fn env_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn seed_from_env() -> Result<BridgeSeed, String> {
    let phrase = env_var("BRIDGE_MNEMONIC").ok_or("BRIDGE_MNEMONIC is not set")?;
    BridgeSeed::from_mnemonic(&phrase, "").map_err(|e| e.to_string())
}

fn nonce_arg(args: &[String], position: usize) -> Result<u64, String> {
    match args.get(position) {
        Some(raw) => parse_nonce(raw).map_err(|e| e.to_string()),
        None => Ok(0),
    }
}

fn cmd_mnemonic() -> CmdResult {
    let phrase = generate_mnemonic();
    let seed = BridgeSeed::from_mnemonic(&phrase, "").map_err(|e| e.to_string())?;
    let xpub = derive_public_extended_key(&seed).map_err(|e| e.to_string())?;

    println!("=== New Testnet Mnemonic ===");
    println!();
    println!("BRIDGE_MNEMONIC=\"{}\"", phrase);
    println!("BRIDGE_XPUB={}", xpub);
    println!();
    println!("WARNING: testnet use only. Store the phrase offline; it controls every deposit address.");
    Ok(())
}

fn cmd_xpub() -> CmdResult {
    let seed = seed_from_env()?;
    let xpub = derive_public_extended_key(&seed).map_err(|e| e.to_string())?;
    println!("{}", xpub);
    Ok(())
}

fn cmd_index(args: &[String]) -> CmdResult {
    let destination = args
        .first()
        .ok_or("usage: bridge-keys index <destination> [nonce]")?;
    let destination = parse_address(destination).map_err(|e| e.to_string())?;
    let nonce = nonce_arg(args, 1)?;
    let index = calculate_index(&destination, nonce);

    println!("Destination: {}", destination);
    println!("Nonce:       {}", nonce);
    println!("Index:       {}", index);

    let address = if let Some(xpub) = env_var("BRIDGE_XPUB") {
        Some(derive_address_from_xpub(&xpub, index).map_err(|e| e.to_string())?)
    } else if env_var("BRIDGE_MNEMONIC").is_some() {
        let seed = seed_from_env()?;
        Some(
            derive_deposit_address(&seed, index)
                .map_err(|e| e.to_string())?
                .address,
        )
    } else {
        None
    };

    if let Some(address) = address {
        println!("Deposit:     {}", address);
    }
    Ok(())
}

fn cmd_verify(args: &[String]) -> CmdResult {
    let (deposit, destination) = match (args.first(), args.get(1)) {
        (Some(deposit), Some(destination)) => (deposit, destination),
        _ => return Err("usage: bridge-keys verify <deposit_address> <destination> [nonce]".into()),
    };
    let nonce = nonce_arg(args, 2)?;
    let xpub = env_var("BRIDGE_XPUB").ok_or("BRIDGE_XPUB is not set")?;

    if verify_deposit_address(&xpub, destination, nonce, deposit) {
        println!("VALID: {} belongs to {} (nonce {})", deposit, destination, nonce);
        Ok(())
    } else {
        Err(format!(
            "INVALID: {} is not the bridge address for {} (nonce {})",
            deposit, destination, nonce
        ))
    }
}
