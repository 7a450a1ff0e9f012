use crate::commands::read_json;
use crate::error::Result;
use crate::output::{print_success, OutputFormat};
use crate::workspace::AdminWorkspace;
use clap::Subcommand;
use jwks_admin::{key_entry, ImporterConfig, KeySet, KeyUse, Patch};
use serde::Serialize;

#[derive(Subcommand, Debug)]
pub enum KeyCommands {
    /// Print the published key set
    List,
    /// Show one key entry
    Get {
        /// Key ID
        kid: String,
    },
    /// Add a key entry from a JWK document
    Add {
        /// JWK file, or `-` for stdin
        #[arg(long)]
        file: String,
    },
    /// Publish the public key of an imported credential
    Publish {
        /// Keystore alias of the credential
        #[arg(long)]
        alias: String,
        /// Key ID [default: the alias]
        #[arg(long)]
        kid: Option<String>,
        /// Key use
        #[arg(long = "use", default_value = "sig")]
        key_use: KeyUse,
        /// JWA algorithm [default: the key family's signing algorithm]
        #[arg(long)]
        alg: Option<String>,
    },
    /// Apply a JSON Patch document to one key entry
    Patch {
        /// Key ID
        kid: String,
        /// JSON Patch file, or `-` for stdin
        #[arg(long)]
        file: String,
    },
    /// Remove a key entry
    Delete {
        /// Key ID
        kid: String,
    },
    /// Replace the whole key set with a JWKS document
    Replace {
        /// JWKS file, or `-` for stdin
        #[arg(long)]
        file: String,
    },
    /// Apply a JSON Patch document to the whole key set
    PatchSet {
        /// JSON Patch file, or `-` for stdin
        #[arg(long)]
        file: String,
    },
    /// Print the RFC 7638 thumbprint of a key entry
    Thumbprint {
        /// Key ID
        kid: String,
    },
}

#[derive(Debug, Serialize)]
struct ThumbprintResponse {
    kid: String,
    thumbprint: String,
}

pub async fn handle(
    cmd: &KeyCommands,
    format: OutputFormat,
    workspace: &AdminWorkspace,
) -> Result<()> {
    let repository = workspace.repository();

    match cmd {
        KeyCommands::List => {
            let key_set = repository.list_keys().await?;
            print_success(format, &key_set);
        }
        KeyCommands::Get { kid } => {
            let entry = repository.get_key(kid).await?;
            print_success(format, &entry);
        }
        KeyCommands::Add { file } => {
            let entry = key_entry::parse(&read_json(file)?)?;
            repository.add_key(entry.clone()).await?;
            print_success(format, &entry);
        }
        KeyCommands::Publish {
            alias,
            kid,
            key_use,
            alg,
        } => {
            let importer = workspace.importer(ImporterConfig::default());
            let entry = importer
                .key_entry_for(alias, kid.as_deref(), *key_use, alg.as_deref())
                .await?;
            repository.add_key(entry.clone()).await?;
            print_success(format, &entry);
        }
        KeyCommands::Patch { kid, file } => {
            let patch = Patch::parse(&read_json(file)?)?;
            let entry = repository.patch_key(kid, &patch).await?;
            print_success(format, &entry);
        }
        KeyCommands::Delete { kid } => {
            let removed = repository.delete_key(kid).await?;
            print_success(format, &removed);
        }
        KeyCommands::Replace { file } => {
            let key_set = KeySet::parse(&read_json(file)?)?;
            let key_set = repository.replace_key_set(key_set).await?;
            print_success(format, &key_set);
        }
        KeyCommands::PatchSet { file } => {
            let patch = Patch::parse(&read_json(file)?)?;
            let key_set = repository.patch_key_set(&patch).await?;
            print_success(format, &key_set);
        }
        KeyCommands::Thumbprint { kid } => {
            let entry = repository.get_key(kid).await?;
            let response = ThumbprintResponse {
                kid: entry.kid.clone(),
                thumbprint: entry.thumbprint()?,
            };
            print_success(format, &response);
        }
    }

    Ok(())
}
