//! Entry-by-entry transformation of streamed tar archives.
//!
//! A [`TarEntryTransformer`] receives archive entries one at a time, hands each to a user hook,
//! and forwards whatever the hook pushes into an [`EntrySink`].  A hook may rename, rewrite,
//! drop or fan out entries, and may keep state across entries in the transformer's context.
//!
//! ```no_run
//! use tar_transform::{archive::transform_archive, TarEntryTransformer, TransformerOptions};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let mut transformer = TarEntryTransformer::new(
//!     TransformerOptions::<u64>::new().on_entry(|transformer, entry| {
//!         Box::pin(async move {
//!             *transformer.ctx_mut() += 1;
//!             let name = format!("out/{}", entry.path());
//!             let header = transformer.with_new_name(&entry.header, &name)?;
//!             transformer.push(entry.with_header(header))?;
//!             anyhow::Ok(())
//!         })
//!     }),
//! );
//!
//! transform_archive(tokio::io::stdin(), tokio::io::stdout(), &mut transformer, 16).await?;
//! eprintln!("{} entries renamed", transformer.ctx());
//! # Ok(())
//! # }
//! ```

pub mod archive;
pub mod content;
pub mod driver;
pub mod entry;
pub mod error;
pub mod headers;
pub mod sink;
pub mod transformer;

mod util;

pub use content::Encoding;
pub use entry::{EntryContent, TarEntry};
pub use error::{Result, TransformError};
pub use headers::HeaderOverrides;
pub use sink::{channel, EntryReceiver, EntrySender, EntrySink, DEFAULT_HIGH_WATER_MARK};
pub use transformer::{HookFuture, Phase, TarEntryTransformer, TransformerOptions};
