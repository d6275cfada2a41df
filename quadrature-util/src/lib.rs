pub mod gauss_hermite; // nodes and weights by the Golub-Welsch algorithm
pub mod gaussian_quad; // tensor-product expectations over diagonal Gaussians
