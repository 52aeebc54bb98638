//! Vane operator tool
//!
//! Authors the JSON definitions the server reads: role tokens, domain
//! delegations, and registry configurations. Domains are stored in A-label
//! form so server-side lookups and delegation keys always agree.

use std::collections::HashMap;
use std::error::Error;
use std::fs;
use std::path::{Path, PathBuf};
use std::process;
use std::time::Duration;

use clap::{Parser, Subcommand};

use vane::ddns::authorize::{Delegation, KeyDef, RoleDef};
use vane::ddns::registry::RegistryDef;
use vane::ddns::store::ConfigStore;

/// Vane operator tool - manage role and registry definitions
#[derive(Parser)]
#[command(name = "vane-admin")]
#[command(version)]
#[command(about = "Manage Vane role and registry definitions", long_about = None)]
struct Cli {
    /// Directory holding the role/ and registry/ definitions
    #[arg(short, long, env = "VANE_DATA_DIR")]
    data_dir: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage roles: tokens and domain delegations
    Role {
        #[command(subcommand)]
        command: RoleCommands,
    },
    /// Manage registry definitions
    Registry {
        #[command(subcommand)]
        command: RegistryCommands,
    },
}

#[derive(Subcommand)]
enum RoleCommands {
    /// Assign a token to a role
    SetToken {
        role: String,
        token: String,
        /// Free-form description of the token holder
        #[arg(long, default_value = "")]
        desc: String,
        /// Expiry as a Unix timestamp; 0 never expires
        #[arg(long, default_value_t = 0)]
        expire: i64,
    },
    /// Revoke a token
    RevokeToken { role: String, token: String },
    /// Grant the role control of a domain through a registry
    Grant {
        role: String,
        domain: String,
        /// Registry responsible for the domain
        #[arg(long)]
        registry: String,
        /// Subdomain glob: empty for the apex only, `*` for any subdomain,
        /// anything else a regular expression
        #[arg(long, default_value = "")]
        glob: String,
    },
    /// Revoke the role's control of a domain
    Revoke { role: String, domain: String },
    /// Delete the role definition entirely, tokens and delegations both
    Delete { role: String },
    /// Print the role definition
    Show { role: String },
}

#[derive(Subcommand)]
enum RegistryCommands {
    /// Create or update a registry definition
    Set {
        name: String,
        /// Builder constructing the provider (e.g. powerdns)
        #[arg(long)]
        builder: String,
        /// Builder parameter, repeatable
        #[arg(long = "param", value_name = "KEY=VALUE")]
        params: Vec<String>,
    },
    /// Delete the registry definition
    Delete { name: String },
    /// Print the registry definition
    Show { name: String },
}

fn main() {
    let cli = Cli::parse();
    if let Err(e) = run(cli) {
        eprintln!("{}", e);
        process::exit(1);
    }
}

fn run(cli: Cli) -> Result<(), Box<dyn Error>> {
    // The store is only borrowed for its key-to-path rules, so definitions
    // written here land exactly where the server looks for them.
    let store = ConfigStore::new(&cli.data_dir, Duration::from_secs(0));

    match cli.command {
        Commands::Role { command } => role_command(&store, command),
        Commands::Registry { command } => registry_command(&store, command),
    }
}

fn role_command(store: &ConfigStore, command: RoleCommands) -> Result<(), Box<dyn Error>> {
    match command {
        RoleCommands::SetToken {
            role,
            token,
            desc,
            expire,
        } => {
            let path = store.resolve(&["role", &role])?;
            let mut def: RoleDef = load_or_default(&path)?;
            def.keys.insert(token, KeyDef { expire, desc });
            save(&path, &def)?;
            println!("Token assigned.");
        }
        RoleCommands::RevokeToken { role, token } => {
            let path = store.resolve(&["role", &role])?;
            let mut def: RoleDef = load_or_default(&path)?;
            if def.keys.remove(&token).is_none() {
                return Err(format!("no such token under role {}", role).into());
            }
            save(&path, &def)?;
            println!("Token revoked.");
        }
        RoleCommands::Grant {
            role,
            domain,
            registry,
            glob,
        } => {
            let domain = idna::domain_to_ascii(&domain)
                .map_err(|_| format!("domain is not a valid IDN: {}", domain))?;
            let path = store.resolve(&["role", &role])?;
            let mut def: RoleDef = load_or_default(&path)?;
            def.managed_domains.insert(
                domain.clone(),
                Delegation {
                    registry,
                    glob: glob.clone(),
                },
            );
            save(&path, &def)?;
            println!(
                "Role {} has gotten control of {} when the subdomain matches pattern `{}`",
                role, domain, glob
            );
        }
        RoleCommands::Revoke { role, domain } => {
            let domain = idna::domain_to_ascii(&domain)
                .map_err(|_| format!("domain is not a valid IDN: {}", domain))?;
            let path = store.resolve(&["role", &role])?;
            let mut def: RoleDef = load_or_default(&path)?;
            if def.managed_domains.remove(&domain).is_none() {
                return Err(format!("domain {} is not under control of the role {}", domain, role).into());
            }
            save(&path, &def)?;
            println!("Role {} has been revoked control of {}", role, domain);
        }
        RoleCommands::Delete { role } => {
            let path = store.resolve(&["role", &role])?;
            fs::remove_file(&path)?;
            println!("Role deleted.");
        }
        RoleCommands::Show { role } => {
            let path = store.resolve(&["role", &role])?;
            let def: RoleDef = load_or_default(&path)?;
            println!("{}", serde_json::to_string_pretty(&def)?);
        }
    }
    Ok(())
}

fn registry_command(store: &ConfigStore, command: RegistryCommands) -> Result<(), Box<dyn Error>> {
    match command {
        RegistryCommands::Set {
            name,
            builder,
            params,
        } => {
            let mut builder_params = HashMap::new();
            for param in params {
                match param.split_once('=') {
                    Some((key, value)) => {
                        builder_params.insert(key.to_string(), value.to_string());
                    }
                    None => return Err(format!("parameter is not KEY=VALUE: {}", param).into()),
                }
            }
            let path = store.resolve(&["registry", &name])?;
            save(
                &path,
                &RegistryDef {
                    builder,
                    builder_params,
                },
            )?;
            println!("Registry configuration of {} written.", name);
        }
        RegistryCommands::Delete { name } => {
            let path = store.resolve(&["registry", &name])?;
            fs::remove_file(&path)?;
            println!("Registry configuration deleted.");
        }
        RegistryCommands::Show { name } => {
            let path = store.resolve(&["registry", &name])?;
            let def: RegistryDef = serde_json::from_slice(&fs::read(&path)?)?;
            println!("{}", serde_json::to_string_pretty(&def)?);
        }
    }
    Ok(())
}

fn load_or_default<T: Default + serde::de::DeserializeOwned>(path: &Path) -> Result<T, Box<dyn Error>> {
    match fs::read(path) {
        Ok(data) => Ok(serde_json::from_slice(&data)?),
        Err(ref e) if e.kind() == std::io::ErrorKind::NotFound => Ok(T::default()),
        Err(e) => Err(e.into()),
    }
}

fn save<T: serde::Serialize>(path: &Path, value: &T) -> Result<(), Box<dyn Error>> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut body = serde_json::to_string_pretty(value)?;
    body.push('\n');
    fs::write(path, body)?;
    Ok(())
}
