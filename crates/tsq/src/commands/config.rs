//! `tsq config` - inspect resolved settings and list profiles.

use std::time::Duration;

use tsq_core::{SslMode, TsqError};

use crate::cli::ConfigAction;

use super::Context;

pub fn run(ctx: &Context, action: ConfigAction) -> Result<(), TsqError> {
    match action {
        ConfigAction::Show => show(ctx),
        ConfigAction::Profiles => profiles(ctx),
    }
}

/// Print every resolved connection setting with the layer it came from.
fn show(ctx: &Context) -> Result<(), TsqError> {
    let spec = ctx.resolve_spec(None)?;
    let config = ctx.load_config()?;

    println!("Connection Settings (resolved):");
    println!("  host: {} ({})", spec.host, spec.sources.host);
    println!("  port: {} ({})", spec.port, spec.sources.port);
    println!("  database: {} ({})", spec.database, spec.sources.database);
    println!("  user: {} ({})", spec.user, spec.sources.user);
    println!(
        "  password: {} ({})",
        if spec.password.is_some() { "***" } else { "not set" },
        spec.sources.password.as_deref().unwrap_or("default"),
    );
    println!("  sslmode: {} ({})", spec.sslmode, spec.sources.sslmode);

    println!();
    println!("General:");
    println!(
        "  timeout: {} ({})",
        timeout_text(spec.timeout),
        spec.sources.timeout,
    );
    println!(
        "  format: {} ({})",
        spec.format.map(|f| f.as_str()).unwrap_or("auto"),
        spec.sources.format.as_deref().unwrap_or("default"),
    );

    println!();
    match &spec.profile {
        Some(name) => println!("Active Profile: {name}"),
        None => println!("Active Profile: none"),
    }
    println!("Config File: {}", config.path.display());
    Ok(())
}

fn profiles(ctx: &Context) -> Result<(), TsqError> {
    let config = ctx.load_config()?;
    // Same selection order as connection resolution: flag, environment,
    // then the config default.
    let active = ctx
        .profile_flag()
        .map(str::to_string)
        .or_else(|| std::env::var("SQL_PROFILE").ok())
        .or_else(|| config.default_profile.clone());

    if config.profiles.is_empty() {
        println!("No profiles configured.");
        println!("Add profiles to: {}", config.path.display());
        return Ok(());
    }

    println!("Available Profiles:");
    println!();
    for (name, profile) in &config.profiles {
        if active.as_deref() == Some(name.as_str()) {
            println!("* {name} (active)");
        } else {
            println!("  {name}");
        }
        println!("      host: {}", profile.host.as_deref().unwrap_or("localhost"));
        println!("      port: {}", profile.port.unwrap_or(5432));
        println!("      database: {}", profile.dbname.as_deref().unwrap_or("postgres"));
        if let Some(user) = &profile.user {
            println!("      user: {user}");
        }
        match profile.sslmode {
            Some(mode) if mode != SslMode::Prefer => println!("      sslmode: {mode}"),
            _ => {}
        }
        println!();
    }
    Ok(())
}

fn timeout_text(timeout: Option<Duration>) -> String {
    match timeout {
        Some(d) => {
            let secs = d.as_secs_f64();
            if secs.fract() == 0.0 {
                format!("{}s", secs as u64)
            } else {
                format!("{secs:.1}s")
            }
        }
        None => "disabled".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_text_covers_disabled_and_fractional() {
        assert_eq!(timeout_text(None), "disabled");
        assert_eq!(timeout_text(Some(Duration::from_secs(30))), "30s");
        assert_eq!(timeout_text(Some(Duration::from_secs_f64(2.5))), "2.5s");
    }
}
