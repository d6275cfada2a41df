pub mod scores; // standardized squared error and negative log probability
