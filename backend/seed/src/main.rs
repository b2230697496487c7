use anyhow::Result;
use clap::{Parser, Subcommand};
use khaad::database::RedisStore;
use khaad_seed::{dedupe_catalog, duplicates, find_owner, rename_company, seed_catalog};
use tracing_subscriber::{EnvFilter, fmt};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Email of the shop owner whose catalog is changed.
    #[arg(long)]
    owner: String,

    #[arg(long, env = "REDIS_URL", default_value = "redis://127.0.0.1:6379")]
    redis_url: String,

    // None runs `seed`.
    #[command(subcommand)]
    job: Option<Job>,
}

#[derive(Subcommand, Debug, PartialEq)]
enum Job {
    /// Add the standard fertilizer catalog.
    Seed,

    /// Remove duplicate products, keeping the oldest.
    Dedupe {
        /// Only list the duplicates.
        #[arg(long)]
        dry_run: bool,
    },

    /// Rewrite a company name on every product.
    RenameCompany {
        #[arg(long)]
        from: String,

        #[arg(long)]
        to: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();
    let args = Args::parse();

    let store = RedisStore::connect(&args.redis_url).await?;
    let owner = find_owner(&store, &args.owner).await?;

    match args.job.unwrap_or(Job::Seed) {
        Job::Seed => {
            let report = seed_catalog(&store, owner).await?;
            println!("Seeded {} new products ({} already present)", report.changed, report.skipped);
        }
        Job::Dedupe { dry_run } => {
            if dry_run {
                for group in duplicates(&store, owner).await? {
                    println!("{} x{}", group[0].display_name(), group.len());
                }
            }

            let report = dedupe_catalog(&store, owner, dry_run).await?;
            if dry_run {
                println!("{} duplicates would be removed", report.skipped);
            } else {
                println!("Removed {} duplicates", report.changed);
            }
        }
        Job::RenameCompany { from, to } => {
            let report = rename_company(&store, owner, &from, &to).await?;
            println!("Renamed {from} to {to} on {} products", report.changed);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seed_is_the_default_job() {
        let args = Args::try_parse_from(["khaad-seed", "--owner", "owner@example.com"]).unwrap();

        assert_eq!(args.owner, "owner@example.com");
        assert_eq!(args.job, None);
    }

    #[test]
    fn jobs_take_their_flags() {
        let args =
            Args::try_parse_from(["khaad-seed", "--owner", "o@example.com", "dedupe", "--dry-run"])
                .unwrap();
        assert_eq!(args.job, Some(Job::Dedupe { dry_run: true }));

        let args = Args::try_parse_from([
            "khaad-seed",
            "--owner",
            "o@example.com",
            "rename-company",
            "--from",
            "Harul",
            "--to",
            "HURL",
        ])
        .unwrap();
        assert_eq!(
            args.job,
            Some(Job::RenameCompany {
                from: "Harul".into(),
                to: "HURL".into()
            })
        );
    }
}
