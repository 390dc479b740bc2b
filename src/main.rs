//! CLI entry point for apim-provision.
//!
//! Loads the service configuration, authenticates as a service principal,
//! then runs one provisioning subcommand and prints the result as JSON.
//!
//! Exit codes:
//! - 0: success
//! - 1: runtime error (auth failure, API error, bad configuration, etc.)
//! - 2: argument validation error (clap handles this automatically)
//! - 3: the user or subscription was not found

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use apim_provision::auth::{ClientSecretAuth, TokenCache, MANAGEMENT_SCOPE};
use apim_provision::client::ApimClient;
use apim_provision::config::ApimConfig;
use apim_provision::error::ApimError;
use apim_provision::subscriptions::{self, KeyKind};
use apim_provision::{groups, users};

const NOT_FOUND: u8 = 3;

#[derive(Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long, default_value = "apim.toml")]
    config: PathBuf,

    /// Azure AD client secret. Prefer the APIM_CLIENT_SECRET environment
    /// variable so the secret stays out of process listings and history.
    #[arg(long, env = "APIM_CLIENT_SECRET", hide_env_values = true)]
    secret: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Look up a user by email address.
    FindUser {
        #[arg(long)]
        email: String,
    },
    /// List a user's subscriptions (first page only).
    Subscriptions {
        #[arg(long)]
        user: String,
    },
    /// Show one subscription, if the user owns it.
    Subscription {
        #[arg(long)]
        id: String,
        #[arg(long)]
        user: String,
    },
    /// Create an active subscription binding a user to a product.
    Subscribe {
        #[arg(long)]
        user: String,
        #[arg(long)]
        product: String,
    },
    /// Regenerate a subscription key (primary unless --secondary).
    RegenerateKey {
        #[arg(long)]
        id: String,
        #[arg(long)]
        user: String,
        #[arg(long)]
        secondary: bool,
    },
    /// Cancel a subscription the user owns.
    Cancel {
        #[arg(long)]
        id: String,
        #[arg(long)]
        user: String,
    },
    /// Add the user with this email to every listed group they are not in.
    AddGroups {
        #[arg(long)]
        email: String,
        /// Group id; repeat for several groups.
        #[arg(long = "group", required = true)]
        groups: Vec<String>,
    },
}

/// Outcome of a command that may legitimately find nothing.
enum Outcome {
    Printed,
    NotFound(String),
}

fn print_json<T: Serialize>(value: &T) -> Result<Outcome, ApimError> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(Outcome::Printed)
}

fn print_optional<T: Serialize>(value: Option<T>, what: &str) -> Result<Outcome, ApimError> {
    match value {
        Some(v) => print_json(&v),
        None => Ok(Outcome::NotFound(what.to_string())),
    }
}

async fn run(client: &ApimClient, command: Command) -> Result<Outcome, ApimError> {
    match command {
        Command::FindUser { email } => {
            let user = users::find_user_by_email(client, &email).await?;
            print_optional(user, "user")
        }
        Command::Subscriptions { user } => {
            print_json(&subscriptions::list_user_subscriptions(client, &user).await?)
        }
        Command::Subscription { id, user } => {
            let sub = subscriptions::get_user_subscription(client, &id, &user).await?;
            print_optional(sub, "subscription")
        }
        Command::Subscribe { user, product } => print_json(
            &subscriptions::add_user_subscription_to_product(client, &user, &product).await?,
        ),
        Command::RegenerateKey {
            id,
            user,
            secondary,
        } => {
            let key = if secondary {
                KeyKind::Secondary
            } else {
                KeyKind::Primary
            };
            let sub = subscriptions::regenerate_key(client, &id, &user, key).await?;
            print_optional(sub, "subscription")
        }
        Command::Cancel { id, user } => {
            let sub = subscriptions::cancel_user_subscription(client, &id, &user).await?;
            print_optional(sub, "subscription")
        }
        Command::AddGroups { email, groups: names } => {
            let Some(user) = users::find_user_by_email(client, &email).await? else {
                return Ok(Outcome::NotFound("user".to_string()));
            };
            let desired: BTreeSet<String> = names.into_iter().collect();
            print_json(&groups::add_user_to_groups(client, &user, &desired).await?)
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Cli::parse();

    let config = match ApimConfig::from_file(&args.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {e}");
            return ExitCode::FAILURE;
        }
    };

    let auth = ClientSecretAuth::new(
        &config.tenant_id,
        &config.client_id,
        &args.secret,
        MANAGEMENT_SCOPE,
    );
    let client = match ApimClient::new(TokenCache::new(auth), &config) {
        Ok(client) => client,
        Err(e) => {
            eprintln!("Error: {e}");
            return ExitCode::FAILURE;
        }
    };

    match run(&client, args.command).await {
        Ok(Outcome::Printed) => ExitCode::SUCCESS,
        Ok(Outcome::NotFound(what)) => {
            eprintln!("Error: {what} not found");
            ExitCode::from(NOT_FOUND)
        }
        Err(ApimError::GroupSync {
            added,
            group,
            source,
        }) => {
            eprintln!("Error: adding to group {group} failed: {source}");
            if !added.is_empty() {
                eprintln!("Already added: {}", added.join(", "));
            }
            ExitCode::FAILURE
        }
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_args() -> Vec<&'static str> {
        vec!["apim-provision", "--secret", "s3cret"]
    }

    #[test]
    fn missing_subcommand_is_rejected() {
        assert!(Cli::try_parse_from(base_args()).is_err());
    }

    #[test]
    fn config_defaults_to_local_file() {
        let mut args = base_args();
        args.extend_from_slice(&["find-user", "--email", "ada@contoso.com"]);
        let cli = Cli::try_parse_from(args).expect("should parse find-user");
        assert_eq!(cli.config, PathBuf::from("apim.toml"));
        assert_eq!(cli.secret, "s3cret");
        assert!(matches!(cli.command, Command::FindUser { ref email } if email == "ada@contoso.com"));
    }

    #[test]
    fn subscribe_requires_product() {
        let mut args = base_args();
        args.extend_from_slice(&["subscribe", "--user", "u-1"]);
        assert!(Cli::try_parse_from(args).is_err());
    }

    #[test]
    fn regenerate_key_defaults_to_primary() {
        let mut args = base_args();
        args.extend_from_slice(&["regenerate-key", "--id", "s-1", "--user", "u-1"]);
        let cli = Cli::try_parse_from(args).expect("should parse regenerate-key");
        assert!(matches!(
            cli.command,
            Command::RegenerateKey {
                secondary: false,
                ..
            }
        ));
    }

    #[test]
    fn add_groups_collects_repeated_flags() {
        let mut args = base_args();
        args.extend_from_slice(&[
            "add-groups",
            "--email",
            "ada@contoso.com",
            "--group",
            "developers",
            "--group",
            "partners",
        ]);
        let cli = Cli::try_parse_from(args).expect("should parse add-groups");
        match cli.command {
            Command::AddGroups { groups, .. } => assert_eq!(groups, vec!["developers", "partners"]),
            _ => panic!("expected AddGroups"),
        }
    }

    #[test]
    fn add_groups_requires_at_least_one_group() {
        let mut args = base_args();
        args.extend_from_slice(&["add-groups", "--email", "ada@contoso.com"]);
        assert!(Cli::try_parse_from(args).is_err());
    }
}
