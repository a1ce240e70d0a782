//! `shopfront-catalog` — product catalog domain (the stock-bearing side of the shop).

pub mod product;

pub use product::{
    AdjustStock, ArchiveProduct, CreateProduct, DecrementStock, PriceChanged, Product,
    ProductArchived, ProductCommand, ProductCreated, ProductEvent, ProductId, SetPrice,
    StockAdjusted,
};
