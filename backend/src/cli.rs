use clap::{Parser, Subcommand};

use records::model::{DelivererId, PackageId, ZoneId};

#[derive(Debug, Parser)]
#[clap(name = "logistima", version, about = "Package dispatch")]
pub struct Cli {
    #[clap(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Create or update the database schema.
    Migrate,

    /// Assign a package to a named deliverer.
    Assign {
        #[clap(long)]
        package: PackageId,
        #[clap(long)]
        deliverer: DelivererId,
    },

    /// Assign a package to the least-loaded available deliverer in its zone.
    AutoAssign {
        #[clap(long)]
        package: PackageId,
    },

    /// Show which deliverer auto-assign would currently pick in a zone.
    Best {
        #[clap(long)]
        zone: ZoneId,
    },

    /// List the deliverers currently in a zone.
    Deliverers {
        #[clap(long)]
        zone: ZoneId,
    },
}
