//! `shopfront-cart` — per-user shopping cart domain.

pub mod cart;

pub use cart::{
    AddLine, Cart, CartCleared, CartCommand, CartEvent, CartId, CartLine, CartOpened, ClearCart,
    LineAdded, OpenCart,
};
