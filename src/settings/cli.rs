use super::Parser;
use clap::{ArgGroup, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "identity-docstore", about = "Administer identity users in the document store")]
pub struct Cli {
    #[arg(long)]
    pub settings: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Create a user and print its id
    Create {
        user_name: String,
        #[arg(long)]
        email: Option<String>,
        #[arg(long)]
        phone: Option<String>,
    },
    /// Print a user as JSON
    Show { id: String },
    /// Look a user up by user name, email or external login
    #[command(group(ArgGroup::new("by").required(true).args(["username", "email", "provider"])))]
    Find {
        #[arg(long)]
        username: Option<String>,
        #[arg(long)]
        email: Option<String>,
        #[arg(long, requires = "key")]
        provider: Option<String>,
        #[arg(long, requires = "provider")]
        key: Option<String>,
    },
    /// List every user
    List,
    Delete { id: String },
    AddRole { id: String, role: String },
    RemoveRole { id: String, role: String },
    AddClaim { id: String, claim_type: String, value: String },
    RemoveClaim { id: String, claim_type: String, value: String },
    AddLogin { id: String, provider: String, key: String },
    /// Hash and store a password, rotating the security stamp
    SetPassword { id: String, password: String },
    /// Lock the user out for the given number of minutes
    Lock {
        id: String,
        #[arg(long, default_value_t = 5)]
        minutes: i64,
    },
    Unlock { id: String },
    /// Record a failed access attempt
    Fail { id: String },
    ResetFailures { id: String },
}
