//! Token subcommands against a running proxy's join API.

use moray_auth::client::AuthClient;

use crate::cli::TokenCommand;

pub fn run(command: TokenCommand) -> anyhow::Result<()> {
    match command {
        TokenCommand::Generate {
            node_name,
            role,
            ttl_secs,
            endpoint,
        } => {
            let client = AuthClient::new(&endpoint);
            let token = client.generate_token(&node_name, &role, ttl_secs)?;
            println!("{token}");
            Ok(())
        }
        TokenCommand::Validate {
            token,
            domain_name,
            endpoint,
        } => {
            let client = AuthClient::new(&endpoint);
            let role = client.validate_token(&token, &domain_name)?;
            println!("valid for {domain_name}, role {role}");
            Ok(())
        }
    }
}
