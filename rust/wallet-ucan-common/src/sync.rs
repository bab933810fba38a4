//! Thread-safety bounds that only apply where there are threads. Async
//! traits across the wallet-ucan crates require [ConditionalSend] and
//! [ConditionalSync] instead of `Send`/`Sync`, so the same trait objects work
//! on native targets and on single-threaded `wasm32`.

#[cfg(not(target_arch = "wasm32"))]
mod bounds {
    /// `Send` on native targets, nothing on `wasm32`
    pub trait ConditionalSend: Send {}

    impl<T: Send + ?Sized> ConditionalSend for T {}

    /// `Send + Sync` on native targets, nothing on `wasm32`
    pub trait ConditionalSync: Send + Sync {}

    impl<T: Send + Sync + ?Sized> ConditionalSync for T {}
}

#[cfg(target_arch = "wasm32")]
mod bounds {
    /// `Send` on native targets, nothing on `wasm32`
    pub trait ConditionalSend {}

    impl<T: ?Sized> ConditionalSend for T {}

    /// `Send + Sync` on native targets, nothing on `wasm32`
    pub trait ConditionalSync {}

    impl<T: ?Sized> ConditionalSync for T {}
}

pub use bounds::*;
