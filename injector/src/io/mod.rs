//! File I/O for data products, masks and catalogs

pub mod catalog;
pub mod fits;

pub use catalog::{read_catalog, read_table, write_catalog, CatalogEntry, CatalogError};
pub use fits::{
    read_bad_pixels, read_plane, read_product, read_segmentation, write_segmentation, FitsError,
    FitsProduct, ProductLayout,
};
