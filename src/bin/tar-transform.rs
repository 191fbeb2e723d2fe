//! Command-line front end: rewrites a tar stream from stdin onto stdout.
//!
//! `tar-transform rewrite` renames entries (strip leading components, add a prefix), drops
//! entries matching `--exclude`, and can append a manifest entry listing everything it emitted.
//! `tar-transform list` prints the entries of an archive without writing one.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::debug;
use tar::EntryType;

use tar_transform::{
    archive::transform_archive, TarEntry, TarEntryTransformer, TransformerOptions,
    DEFAULT_HIGH_WATER_MARK,
};

/// tar-transform
#[derive(Debug, Parser)]
#[clap(name = "tar-transform", version)]
pub struct App {
    /// Number of transformed entries to buffer before pausing input
    #[clap(long, default_value_t = DEFAULT_HIGH_WATER_MARK)]
    high_water_mark: usize,

    #[clap(subcommand)]
    cmd: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Rename and filter the entries of the archive on stdin, writing the result to stdout
    Rewrite {
        /// Prepended to every path after stripping
        #[clap(long, default_value = "")]
        prefix: String,
        /// Remove this many leading path components; entries left without a name are dropped
        #[clap(long, default_value_t = 0)]
        strip_components: usize,
        /// Drop entries whose path contains this string (may be repeated)
        #[clap(long)]
        exclude: Vec<String>,
        /// Append an entry with this name listing every emitted path
        #[clap(long)]
        manifest: Option<String>,
    },
    /// Print the path and size of each entry of the archive on stdin
    List,
}

#[derive(Debug, Default)]
struct Rewrite {
    prefix: String,
    strip_components: usize,
    exclude: Vec<String>,
    manifest: Option<String>,
    emitted: Vec<String>,
    /// Extension records (GNU long links, PAX headers) waiting for the entry they describe.
    pending: Vec<TarEntry>,
}

impl Rewrite {
    /// Computes the output path for `path`, or `None` if the entry should be dropped.
    fn new_path(&self, path: &str) -> Option<String> {
        if self.exclude.iter().any(|pattern| path.contains(pattern.as_str())) {
            return None;
        }

        let components: Vec<&str> = path
            .split('/')
            .filter(|c| !c.is_empty() && *c != ".")
            .skip(self.strip_components)
            .collect();
        if components.is_empty() {
            return None;
        }

        let mut new = format!("{}{}", self.prefix, components.join("/"));
        if path.ends_with('/') {
            new.push('/');
        }
        Some(new)
    }
}

fn rewrite_entry(transformer: &mut TarEntryTransformer<Rewrite>, entry: TarEntry) -> Result<()> {
    match entry.header.entry_type() {
        EntryType::GNULongLink | EntryType::XHeader => {
            transformer.ctx_mut().pending.push(entry);
            return Ok(());
        }
        EntryType::XGlobalHeader => {
            transformer.push(entry)?;
            return Ok(());
        }
        _ => {}
    }

    let path = entry.path();
    let pending = std::mem::take(&mut transformer.ctx_mut().pending);
    let Some(new_path) = transformer.ctx().new_path(&path) else {
        debug!("dropping {path} and {} extension records", pending.len());
        return Ok(());
    };

    let mut entry = entry;
    entry
        .rename(&new_path)
        .with_context(|| format!("renaming {path} to {new_path}"))?;
    for record in pending {
        transformer.push(record)?;
    }
    transformer.push(entry)?;
    transformer.ctx_mut().emitted.push(new_path);
    Ok(())
}

fn write_manifest(transformer: &mut TarEntryTransformer<Rewrite>) -> Result<()> {
    let orphans = std::mem::take(&mut transformer.ctx_mut().pending);
    if !orphans.is_empty() {
        debug!("dropping {} trailing extension records", orphans.len());
    }

    let Some(name) = transformer.ctx().manifest.clone() else {
        return Ok(());
    };

    let mut listing = String::new();
    for path in &transformer.ctx().emitted {
        listing.push_str(path);
        listing.push('\n');
    }
    transformer.push(TarEntry::from_bytes(&name, listing)?)?;
    Ok(())
}

fn rewriter(rules: Rewrite) -> TarEntryTransformer<Rewrite> {
    TarEntryTransformer::new(
        TransformerOptions::with_ctx(rules)
            .on_entry_sync(rewrite_entry)
            .on_end_sync(write_manifest),
    )
}

async fn rewrite(high_water_mark: usize, rules: Rewrite) -> Result<()> {
    let mut transformer = rewriter(rules);

    transform_archive(
        tokio::io::stdin(),
        tokio::io::stdout(),
        &mut transformer,
        high_water_mark,
    )
    .await?;

    debug!(
        "{} entries in, {} entries out",
        transformer.entries_handled(),
        transformer.entries_pushed()
    );
    Ok(())
}

async fn list(high_water_mark: usize) -> Result<()> {
    let mut transformer = TarEntryTransformer::new(
        TransformerOptions::<Vec<(String, u64)>>::new().on_entry_sync(|transformer, entry| {
            let size = entry.size()?;
            transformer.ctx_mut().push((entry.path(), size));
            Ok(())
        }),
    );

    transform_archive(
        tokio::io::stdin(),
        tokio::io::sink(),
        &mut transformer,
        high_water_mark,
    )
    .await?;

    for (path, size) in transformer.into_ctx() {
        println!("{size:>12} {path}");
    }
    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    env_logger::init();

    let args = App::parse();

    match args.cmd {
        Command::Rewrite {
            prefix,
            strip_components,
            exclude,
            manifest,
        } => {
            let rules = Rewrite {
                prefix,
                strip_components,
                exclude,
                manifest,
                ..Default::default()
            };
            rewrite(args.high_water_mark, rules).await
        }
        Command::List => list(args.high_water_mark).await,
    }
}
