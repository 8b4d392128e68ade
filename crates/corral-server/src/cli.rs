use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

#[derive(Debug, Parser)]
#[command(name = "corral-server", version)]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    Serve,
    Migrate,
    /// Mint a token pair signed with the configured secret.
    IssueToken {
        #[arg(long)]
        subject: String,
        #[arg(long, value_enum, default_value_t = RoleArg::User)]
        role: RoleArg,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum RoleArg {
    User,
    Admin,
}

impl From<RoleArg> for corral_core::token::Role {
    fn from(role: RoleArg) -> Self {
        match role {
            RoleArg::User => corral_core::token::Role::User,
            RoleArg::Admin => corral_core::token::Role::Admin,
        }
    }
}
