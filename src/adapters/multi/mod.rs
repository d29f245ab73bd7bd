//! Composite stores built from several backends.
//!
//! [`Mirror`] implements [`Store`](crate::Store) by replicating every write to
//! all of its backends and reading from the first backend that has the
//! object. Because a mirror is itself a store, mirrors compose.
//!
//! # Examples
//!
//! ```no_run
//! # async fn example() -> dogbox_store::Result<()> {
//! use dogbox_store::{LocalStore, Mirror, StoreExt};
//!
//! let mirror = Mirror::builder()
//!     .add_backend(LocalStore::new("/srv/dogbox/a"))
//!     .add_backend(LocalStore::new("/srv/dogbox/b"))
//!     .base_url("https://dogbox.example/f")
//!     .build();
//!
//! // Lands on both disks, or on neither
//! mirror.put_bytes("Xk3/abc.png", b"...").await?;
//!
//! // Served from the first disk that has it
//! let data = mirror.get_bytes("Xk3/abc.png").await?;
//! # let _ = data;
//! # Ok(())
//! # }
//! ```

mod mirror;

pub use mirror::{Mirror, MirrorBuilder};
