use crate::commands::read_source;
use crate::error::{Error, Result};
use crate::output::{print_success, OutputFormat};
use crate::workspace::AdminWorkspace;
use clap::Subcommand;
use jwks_admin::{CredentialSummary, ImporterConfig};
use serde::Serialize;

#[derive(Subcommand, Debug)]
pub enum CredentialCommands {
    /// Import a certificate and its private key
    Import {
        /// Alias to store the credential under
        #[arg(long)]
        alias: String,
        /// Certificate PEM file, or `-` for stdin
        #[arg(long)]
        certificate: String,
        /// Private key PEM file, or `-` for stdin
        #[arg(long)]
        private_key: String,
        /// Encoding of both files
        #[arg(long, default_value = "PEM")]
        encoding: String,
        /// Replace a credential already stored under the alias
        #[arg(long)]
        overwrite: bool,
    },
    /// List stored credentials
    List,
    /// Remove a stored credential
    Remove {
        /// Alias of the credential
        alias: String,
    },
}

#[derive(Debug, Serialize)]
struct CredentialListResponse {
    credentials: Vec<CredentialSummary>,
    total: usize,
}

pub async fn handle(
    cmd: &CredentialCommands,
    format: OutputFormat,
    workspace: &AdminWorkspace,
) -> Result<()> {
    match cmd {
        CredentialCommands::Import {
            alias,
            certificate,
            private_key,
            encoding,
            overwrite,
        } => {
            if certificate == "-" && private_key == "-" {
                return Err(Error::invalid_parameter(
                    "Only one of --certificate and --private-key can be read from stdin",
                ));
            }
            let certificate_pem = read_source(certificate)?;
            let private_key_pem = read_source(private_key)?;

            let importer =
                workspace.importer(ImporterConfig::new().with_alias_overwrite(*overwrite));
            let summary = importer
                .import_credential(encoding, alias, &certificate_pem, &private_key_pem)
                .await?;
            print_success(format, &summary);
        }
        CredentialCommands::List => {
            let credentials = workspace
                .importer(ImporterConfig::default())
                .list_credentials()
                .await?;
            let response = CredentialListResponse {
                total: credentials.len(),
                credentials,
            };
            print_success(format, &response);
        }
        CredentialCommands::Remove { alias } => {
            let summary = workspace
                .importer(ImporterConfig::default())
                .remove_credential(alias)
                .await?;
            print_success(format, &summary);
        }
    }

    Ok(())
}
