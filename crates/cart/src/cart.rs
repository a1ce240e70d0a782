use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use shopfront_catalog::ProductId;
use shopfront_core::{Aggregate, AggregateId, AggregateRoot, DomainError, UserId};
use shopfront_events::Event;

/// Cart identifier.
///
/// A cart is owned by exactly one user, so the cart stream id is derived
/// from the owner's id. Looking up "the cart of user X" then needs no
/// directory, and two carts for one user cannot exist.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CartId(pub AggregateId);

impl CartId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }

    /// The cart stream for a given owner.
    pub fn for_user(user_id: UserId) -> Self {
        Self(AggregateId::from_uuid(*user_id.as_uuid()))
    }
}

impl core::fmt::Display for CartId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Cart line: product + accumulated quantity.
///
/// Lines are unique per product; adding the same product again merges into
/// the existing line. Insertion order is preserved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartLine {
    pub product_id: ProductId,
    pub quantity: i64,
}

/// Aggregate root: Cart.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cart {
    id: CartId,
    owner: Option<UserId>,
    lines: Vec<CartLine>,
    version: u64,
    opened: bool,
}

impl Cart {
    /// Create an empty, not-yet-opened aggregate instance for rehydration.
    pub fn empty(id: CartId) -> Self {
        Self {
            id,
            owner: None,
            lines: Vec::new(),
            version: 0,
            opened: false,
        }
    }

    pub fn id_typed(&self) -> CartId {
        self.id
    }

    pub fn owner(&self) -> Option<UserId> {
        self.owner
    }

    pub fn is_opened(&self) -> bool {
        self.opened
    }

    /// Lines in insertion order.
    pub fn lines(&self) -> &[CartLine] {
        &self.lines
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Accumulated quantity for a product, 0 when absent.
    pub fn line_quantity(&self, product_id: ProductId) -> i64 {
        self.lines
            .iter()
            .find(|l| l.product_id == product_id)
            .map(|l| l.quantity)
            .unwrap_or(0)
    }
}

impl AggregateRoot for Cart {
    type Id = CartId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: OpenCart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenCart {
    pub cart_id: CartId,
    pub user_id: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: AddLine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddLine {
    pub cart_id: CartId,
    pub product_id: ProductId,
    pub quantity: i64,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ClearCart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClearCart {
    pub cart_id: CartId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CartCommand {
    OpenCart(OpenCart),
    AddLine(AddLine),
    ClearCart(ClearCart),
}

/// Event: CartOpened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartOpened {
    pub cart_id: CartId,
    pub user_id: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: LineAdded (delta; application merges per product).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineAdded {
    pub cart_id: CartId,
    pub product_id: ProductId,
    pub quantity: i64,
    pub occurred_at: DateTime<Utc>,
}

/// Event: CartCleared.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartCleared {
    pub cart_id: CartId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CartEvent {
    CartOpened(CartOpened),
    LineAdded(LineAdded),
    CartCleared(CartCleared),
}

impl Event for CartEvent {
    fn event_type(&self) -> &'static str {
        match self {
            CartEvent::CartOpened(_) => "cart.opened",
            CartEvent::LineAdded(_) => "cart.line_added",
            CartEvent::CartCleared(_) => "cart.cleared",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            CartEvent::CartOpened(e) => e.occurred_at,
            CartEvent::LineAdded(e) => e.occurred_at,
            CartEvent::CartCleared(e) => e.occurred_at,
        }
    }
}

impl Aggregate for Cart {
    type Command = CartCommand;
    type Event = CartEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            CartEvent::CartOpened(e) => {
                self.id = e.cart_id;
                self.owner = Some(e.user_id);
                self.lines.clear();
                self.opened = true;
            }
            CartEvent::LineAdded(e) => {
                match self.lines.iter_mut().find(|l| l.product_id == e.product_id) {
                    Some(line) => line.quantity += e.quantity,
                    None => self.lines.push(CartLine {
                        product_id: e.product_id,
                        quantity: e.quantity,
                    }),
                }
            }
            CartEvent::CartCleared(_) => {
                self.lines.clear();
            }
        }

        // Deterministic version tracking: +1 per applied event.
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            CartCommand::OpenCart(cmd) => self.handle_open(cmd),
            CartCommand::AddLine(cmd) => self.handle_add_line(cmd),
            CartCommand::ClearCart(cmd) => self.handle_clear(cmd),
        }
    }
}

impl Cart {
    fn ensure_cart_id(&self, cart_id: CartId) -> Result<(), DomainError> {
        if self.id != cart_id {
            return Err(DomainError::invariant("cart_id mismatch"));
        }
        Ok(())
    }

    fn handle_open(&self, cmd: &OpenCart) -> Result<Vec<CartEvent>, DomainError> {
        if self.opened {
            return Err(DomainError::conflict("cart already opened"));
        }
        if cmd.cart_id != CartId::for_user(cmd.user_id) {
            return Err(DomainError::invariant(
                "cart_id must be derived from the owning user",
            ));
        }
        Ok(vec![CartEvent::CartOpened(CartOpened {
            cart_id: cmd.cart_id,
            user_id: cmd.user_id,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_add_line(&self, cmd: &AddLine) -> Result<Vec<CartEvent>, DomainError> {
        if !self.opened {
            return Err(DomainError::not_found());
        }
        self.ensure_cart_id(cmd.cart_id)?;

        if cmd.quantity <= 0 {
            return Err(DomainError::validation("quantity must be positive"));
        }

        Ok(vec![CartEvent::LineAdded(LineAdded {
            cart_id: cmd.cart_id,
            product_id: cmd.product_id,
            quantity: cmd.quantity,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_clear(&self, cmd: &ClearCart) -> Result<Vec<CartEvent>, DomainError> {
        if !self.opened {
            return Err(DomainError::not_found());
        }
        self.ensure_cart_id(cmd.cart_id)?;

        if self.lines.is_empty() {
            return Err(DomainError::invariant("cart is already empty"));
        }

        Ok(vec![CartEvent::CartCleared(CartCleared {
            cart_id: cmd.cart_id,
            occurred_at: cmd.occurred_at,
        })])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_user_id() -> UserId {
        UserId::new()
    }

    fn test_product_id() -> ProductId {
        ProductId::new(AggregateId::new())
    }

    fn test_time() -> DateTime<Utc> {
        Utc::now()
    }

    fn opened_cart(user_id: UserId) -> Cart {
        let cart_id = CartId::for_user(user_id);
        let mut cart = Cart::empty(cart_id);
        let events = cart
            .handle(&CartCommand::OpenCart(OpenCart {
                cart_id,
                user_id,
                occurred_at: test_time(),
            }))
            .unwrap();
        cart.apply(&events[0]);
        cart
    }

    #[test]
    fn cart_id_is_derived_from_owner() {
        let user_id = test_user_id();
        assert_eq!(CartId::for_user(user_id), CartId::for_user(user_id));
        assert_ne!(CartId::for_user(user_id), CartId::for_user(test_user_id()));
    }

    #[test]
    fn open_cart_records_owner() {
        let user_id = test_user_id();
        let cart = opened_cart(user_id);
        assert!(cart.is_opened());
        assert_eq!(cart.owner(), Some(user_id));
        assert!(cart.is_empty());
    }

    #[test]
    fn open_with_foreign_cart_id_is_rejected() {
        let user_id = test_user_id();
        let wrong_id = CartId::new(AggregateId::new());
        let cart = Cart::empty(wrong_id);
        let err = cart
            .handle(&CartCommand::OpenCart(OpenCart {
                cart_id: wrong_id,
                user_id,
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::InvariantViolation(_)));
    }

    #[test]
    fn add_line_creates_then_merges() {
        let mut cart = opened_cart(test_user_id());
        let product_id = test_product_id();

        for qty in [2, 3] {
            let events = cart
                .handle(&CartCommand::AddLine(AddLine {
                    cart_id: cart.id_typed(),
                    product_id,
                    quantity: qty,
                    occurred_at: test_time(),
                }))
                .unwrap();
            cart.apply(&events[0]);
        }

        assert_eq!(cart.lines().len(), 1);
        assert_eq!(cart.line_quantity(product_id), 5);
    }

    #[test]
    fn lines_preserve_insertion_order() {
        let mut cart = opened_cart(test_user_id());
        let first = test_product_id();
        let second = test_product_id();

        for product_id in [first, second, first] {
            let events = cart
                .handle(&CartCommand::AddLine(AddLine {
                    cart_id: cart.id_typed(),
                    product_id,
                    quantity: 1,
                    occurred_at: test_time(),
                }))
                .unwrap();
            cart.apply(&events[0]);
        }

        let products: Vec<_> = cart.lines().iter().map(|l| l.product_id).collect();
        assert_eq!(products, vec![first, second]);
        assert_eq!(cart.line_quantity(first), 2);
    }

    #[test]
    fn add_line_rejects_non_positive_quantity() {
        let cart = opened_cart(test_user_id());
        let err = cart
            .handle(&CartCommand::AddLine(AddLine {
                cart_id: cart.id_typed(),
                product_id: test_product_id(),
                quantity: 0,
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn add_line_to_unopened_cart_is_not_found() {
        let user_id = test_user_id();
        let cart = Cart::empty(CartId::for_user(user_id));
        let err = cart
            .handle(&CartCommand::AddLine(AddLine {
                cart_id: cart.id_typed(),
                product_id: test_product_id(),
                quantity: 1,
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::NotFound));
    }

    #[test]
    fn clear_empties_lines_but_cart_survives() {
        let mut cart = opened_cart(test_user_id());
        let events = cart
            .handle(&CartCommand::AddLine(AddLine {
                cart_id: cart.id_typed(),
                product_id: test_product_id(),
                quantity: 2,
                occurred_at: test_time(),
            }))
            .unwrap();
        cart.apply(&events[0]);

        let events = cart
            .handle(&CartCommand::ClearCart(ClearCart {
                cart_id: cart.id_typed(),
                occurred_at: test_time(),
            }))
            .unwrap();
        cart.apply(&events[0]);

        assert!(cart.is_empty());
        assert!(cart.is_opened());
    }

    #[test]
    fn clearing_an_empty_cart_is_rejected() {
        let cart = opened_cart(test_user_id());
        let err = cart
            .handle(&CartCommand::ClearCart(ClearCart {
                cart_id: cart.id_typed(),
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::InvariantViolation(_)));
    }

    mod proptest_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            /// Property: repeated adds keep lines unique per product with
            /// positive accumulated quantities.
            #[test]
            fn lines_stay_unique_per_product(
                adds in proptest::collection::vec((0usize..4, 1i64..10), 1..30)
            ) {
                let user_id = UserId::new();
                let mut cart = opened_cart(user_id);
                let products: Vec<ProductId> =
                    (0..4).map(|_| ProductId::new(AggregateId::new())).collect();

                for (idx, qty) in adds {
                    let events = cart
                        .handle(&CartCommand::AddLine(AddLine {
                            cart_id: cart.id_typed(),
                            product_id: products[idx],
                            quantity: qty,
                            occurred_at: Utc::now(),
                        }))
                        .unwrap();
                    cart.apply(&events[0]);
                }

                let mut seen = std::collections::HashSet::new();
                for line in cart.lines() {
                    prop_assert!(seen.insert(line.product_id));
                    prop_assert!(line.quantity > 0);
                }
            }
        }
    }
}
