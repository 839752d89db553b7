//! CA subcommands against a running proxy's join API.

use moray_auth::client::AuthClient;

use crate::cli::CaCommand;

pub fn run(command: CaCommand) -> anyhow::Result<()> {
    match command {
        CaCommand::Show { endpoint } => {
            let client = AuthClient::new(&endpoint);
            for key in client.host_ca_keys()? {
                println!("{key}");
            }
            Ok(())
        }
    }
}
