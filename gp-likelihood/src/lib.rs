pub mod gamma; // gamma observation likelihood with latent shape and rate channels
pub mod gaussian; // heteroscedastic gaussian observation likelihood
pub mod special_fn; // scalar special-function helpers
pub mod traits; // observation likelihood interface
