use anyhow::Result;
use parley_core::{Credentials, ParleyConfig};
use std::io::{self, BufRead, Write};

fn read_line(prompt: &str) -> Result<String> {
    print!("{prompt}");
    io::stdout().flush()?;
    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;
    Ok(line.trim().to_string())
}

fn read_or_default(prompt: &str, default: String) -> Result<String> {
    let value = read_line(&format!("{prompt} [{default}]: "))?;
    Ok(if value.is_empty() { default } else { value })
}

pub fn run_setup() -> Result<Credentials> {
    println!("\nWelcome to Parley");
    println!("No assistant configured. Let's set one up.\n");

    let defaults = ParleyConfig::default();
    let base_url = read_or_default("Assistant URL", defaults.base_url)?;
    let user_id = read_or_default("User id", defaults.user_id)?;

    print!("API key (leave empty if none): ");
    io::stdout().flush()?;
    let api_key = rpassword::read_password()?.trim().to_string();

    let creds = Credentials {
        base_url,
        user_id,
        api_key,
    };
    creds.save()?;
    println!("Saved to {}\n", Credentials::path().display());

    Ok(creds)
}
