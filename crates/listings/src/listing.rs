use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use shareledger_auth::{
    Principal, can_approve, can_create_listing, can_edit_listing, can_purchase, require,
};
use shareledger_core::{Aggregate, AggregateRoot, DomainError, DomainResult, Event, ListingId, UserId};

use crate::pricing::{
    ensure_representable, price_per_share, purchase_amount, reconcile_available, value_remaining,
};
use crate::status::ListingStatus;

/// Persisted columns of a listing row.
///
/// `version` increments once per applied event and lets stores reject writes
/// computed from a stale row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListingRecord {
    pub id: ListingId,
    pub seller_id: UserId,
    pub title: String,
    pub description: String,
    pub total_price: Decimal,
    pub total_shares: i64,
    pub available_shares: i64,
    pub status: ListingStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub version: u64,
}

impl ListingRecord {
    /// Snapshot with derived pricing, as returned to callers.
    pub fn view(&self) -> DomainResult<ListingView> {
        Ok(ListingView {
            id: self.id,
            seller_id: self.seller_id,
            title: self.title.clone(),
            description: self.description.clone(),
            total_price: self.total_price,
            total_shares: self.total_shares,
            available_shares: self.available_shares,
            status: self.status,
            price_per_share: price_per_share(self.total_price, self.total_shares)?,
            value_remaining: value_remaining(
                self.total_price,
                self.total_shares,
                self.available_shares,
            )?,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

/// Read-side listing snapshot including derived values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListingView {
    pub id: ListingId,
    pub seller_id: UserId,
    pub title: String,
    pub description: String,
    pub total_price: Decimal,
    pub total_shares: i64,
    pub available_shares: i64,
    pub status: ListingStatus,
    pub price_per_share: Decimal,
    pub value_remaining: Decimal,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Aggregate root: Listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Listing {
    id: ListingId,
    seller_id: Option<UserId>,
    title: String,
    description: String,
    total_price: Decimal,
    total_shares: i64,
    available_shares: i64,
    status: ListingStatus,
    created_at: Option<DateTime<Utc>>,
    updated_at: Option<DateTime<Utc>>,
    version: u64,
    created: bool,
    deleted: bool,
}

impl Listing {
    /// Create an empty, not-yet-created aggregate instance.
    pub fn empty(id: ListingId) -> Self {
        Self {
            id,
            seller_id: None,
            title: String::new(),
            description: String::new(),
            total_price: Decimal::ZERO,
            total_shares: 0,
            available_shares: 0,
            status: ListingStatus::Pending,
            created_at: None,
            updated_at: None,
            version: 0,
            created: false,
            deleted: false,
        }
    }

    /// Rebuild the aggregate from a stored row.
    pub fn restore(record: ListingRecord) -> Self {
        Self {
            id: record.id,
            seller_id: Some(record.seller_id),
            title: record.title,
            description: record.description,
            total_price: record.total_price,
            total_shares: record.total_shares,
            available_shares: record.available_shares,
            status: record.status,
            created_at: Some(record.created_at),
            updated_at: Some(record.updated_at),
            version: record.version,
            created: true,
            deleted: false,
        }
    }

    /// Current row state; `NotFound` if never created or deleted.
    pub fn record(&self) -> DomainResult<ListingRecord> {
        let (Some(seller_id), Some(created_at), Some(updated_at)) =
            (self.seller_id, self.created_at, self.updated_at)
        else {
            return Err(DomainError::not_found());
        };
        if !self.exists() {
            return Err(DomainError::not_found());
        }
        Ok(ListingRecord {
            id: self.id,
            seller_id,
            title: self.title.clone(),
            description: self.description.clone(),
            total_price: self.total_price,
            total_shares: self.total_shares,
            available_shares: self.available_shares,
            status: self.status,
            created_at,
            updated_at,
            version: self.version,
        })
    }

    pub fn view(&self) -> DomainResult<ListingView> {
        self.record()?.view()
    }

    pub fn id_typed(&self) -> ListingId {
        self.id
    }

    pub fn exists(&self) -> bool {
        self.created && !self.deleted
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted
    }

    pub fn seller_id(&self) -> Option<UserId> {
        self.seller_id
    }

    pub fn status(&self) -> ListingStatus {
        self.status
    }

    pub fn total_price(&self) -> Decimal {
        self.total_price
    }

    pub fn total_shares(&self) -> i64 {
        self.total_shares
    }

    pub fn available_shares(&self) -> i64 {
        self.available_shares
    }
}

impl AggregateRoot for Listing {
    type Id = ListingId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

fn validate_terms(title: &str, total_price: Decimal, total_shares: i64) -> DomainResult<()> {
    if title.trim().is_empty() {
        return Err(DomainError::validation("title required"));
    }
    if total_price <= Decimal::ZERO {
        return Err(DomainError::validation("total price must be a positive number"));
    }
    if total_shares <= 0 {
        return Err(DomainError::validation("total shares must be a positive integer"));
    }
    ensure_representable(total_price, total_shares)
}

/// Command: CreateListing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateListing {
    pub listing_id: ListingId,
    pub seller: Principal,
    pub title: String,
    pub description: String,
    pub total_price: Decimal,
    pub total_shares: i64,
    pub occurred_at: DateTime<Utc>,
}

impl CreateListing {
    pub fn validate(&self) -> DomainResult<()> {
        validate_terms(&self.title, self.total_price, self.total_shares)
    }
}

/// Command: EditListing (title, description, price and share count).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EditListing {
    pub listing_id: ListingId,
    pub actor: Principal,
    pub title: String,
    pub description: String,
    pub total_price: Decimal,
    pub total_shares: i64,
    pub occurred_at: DateTime<Utc>,
}

impl EditListing {
    pub fn validate(&self) -> DomainResult<()> {
        validate_terms(&self.title, self.total_price, self.total_shares)
    }
}

/// Command: ApproveListing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApproveListing {
    pub listing_id: ListingId,
    pub actor: Principal,
    pub occurred_at: DateTime<Utc>,
}

/// Command: PurchaseShares.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseShares {
    pub listing_id: ListingId,
    pub buyer: Principal,
    pub shares: i64,
    /// Reject purchases against listings that are still pending review.
    pub require_approved: bool,
    pub occurred_at: DateTime<Utc>,
}

impl PurchaseShares {
    pub fn validate(&self) -> DomainResult<()> {
        if self.shares <= 0 {
            return Err(DomainError::validation("shares must be a positive integer"));
        }
        Ok(())
    }
}

/// Command: DeleteListing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteListing {
    pub listing_id: ListingId,
    pub actor: Principal,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ListingCommand {
    Create(CreateListing),
    Edit(EditListing),
    Approve(ApproveListing),
    Purchase(PurchaseShares),
    Delete(DeleteListing),
}

/// Event: ListingCreated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListingCreated {
    pub listing_id: ListingId,
    pub seller_id: UserId,
    pub title: String,
    pub description: String,
    pub total_price: Decimal,
    pub total_shares: i64,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ListingEdited.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListingEdited {
    pub listing_id: ListingId,
    pub editor_id: UserId,
    pub title: String,
    pub description: String,
    pub total_price: Decimal,
    pub total_shares: i64,
    pub available_shares: i64,
    pub status: ListingStatus,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ListingApproved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListingApproved {
    pub listing_id: ListingId,
    pub approved_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: SharesPurchased.
///
/// `amount` is fixed at decision time from the row the decision was made on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SharesPurchased {
    pub listing_id: ListingId,
    pub buyer_id: UserId,
    pub shares: i64,
    pub amount: Decimal,
    pub price_per_share: Decimal,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ListingDeleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListingDeleted {
    pub listing_id: ListingId,
    pub deleted_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ListingEvent {
    Created(ListingCreated),
    Edited(ListingEdited),
    Approved(ListingApproved),
    SharesPurchased(SharesPurchased),
    Deleted(ListingDeleted),
}

impl Event for ListingEvent {
    fn event_type(&self) -> &'static str {
        match self {
            ListingEvent::Created(_) => "listing.created",
            ListingEvent::Edited(_) => "listing.edited",
            ListingEvent::Approved(_) => "listing.approved",
            ListingEvent::SharesPurchased(_) => "listing.shares_purchased",
            ListingEvent::Deleted(_) => "listing.deleted",
        }
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            ListingEvent::Created(e) => e.occurred_at,
            ListingEvent::Edited(e) => e.occurred_at,
            ListingEvent::Approved(e) => e.occurred_at,
            ListingEvent::SharesPurchased(e) => e.occurred_at,
            ListingEvent::Deleted(e) => e.occurred_at,
        }
    }
}

impl Aggregate for Listing {
    type Command = ListingCommand;
    type Event = ListingEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            ListingEvent::Created(e) => {
                self.id = e.listing_id;
                self.seller_id = Some(e.seller_id);
                self.title = e.title.trim().to_string();
                self.description = e.description.clone();
                self.total_price = e.total_price;
                self.total_shares = e.total_shares;
                self.available_shares = e.total_shares;
                self.status = ListingStatus::Pending;
                self.created_at = Some(e.occurred_at);
                self.updated_at = Some(e.occurred_at);
                self.created = true;
            }
            ListingEvent::Edited(e) => {
                self.title = e.title.trim().to_string();
                self.description = e.description.clone();
                self.total_price = e.total_price;
                self.total_shares = e.total_shares;
                self.available_shares = e.available_shares;
                self.status = e.status;
                self.updated_at = Some(e.occurred_at);
            }
            ListingEvent::Approved(e) => {
                self.status = self.status.after_approve();
                self.updated_at = Some(e.occurred_at);
            }
            ListingEvent::SharesPurchased(e) => {
                self.available_shares -= e.shares;
                self.updated_at = Some(e.occurred_at);
            }
            ListingEvent::Deleted(e) => {
                self.deleted = true;
                self.updated_at = Some(e.occurred_at);
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            ListingCommand::Create(cmd) => self.handle_create(cmd),
            ListingCommand::Edit(cmd) => self.handle_edit(cmd),
            ListingCommand::Approve(cmd) => self.handle_approve(cmd),
            ListingCommand::Purchase(cmd) => self.handle_purchase(cmd),
            ListingCommand::Delete(cmd) => self.handle_delete(cmd),
        }
    }
}

impl Listing {
    fn ensure_exists(&self, listing_id: ListingId) -> Result<UserId, DomainError> {
        if !self.exists() {
            return Err(DomainError::not_found());
        }
        if self.id != listing_id {
            return Err(DomainError::invariant("listing_id mismatch"));
        }
        self.seller_id.ok_or_else(DomainError::not_found)
    }

    fn handle_create(&self, cmd: &CreateListing) -> Result<Vec<ListingEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("listing already exists"));
        }
        require(&cmd.seller, can_create_listing(&cmd.seller), "create listings")?;
        cmd.validate()?;

        Ok(vec![ListingEvent::Created(ListingCreated {
            listing_id: cmd.listing_id,
            seller_id: cmd.seller.id,
            title: cmd.title.trim().to_string(),
            description: cmd.description.clone(),
            total_price: cmd.total_price,
            total_shares: cmd.total_shares,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_edit(&self, cmd: &EditListing) -> Result<Vec<ListingEvent>, DomainError> {
        cmd.validate()?;
        let owner = self.ensure_exists(cmd.listing_id)?;
        require(&cmd.actor, can_edit_listing(&cmd.actor, owner), "edit this listing")?;

        let available_shares =
            reconcile_available(self.total_shares, self.available_shares, cmd.total_shares)?;

        Ok(vec![ListingEvent::Edited(ListingEdited {
            listing_id: cmd.listing_id,
            editor_id: cmd.actor.id,
            title: cmd.title.trim().to_string(),
            description: cmd.description.clone(),
            total_price: cmd.total_price,
            total_shares: cmd.total_shares,
            available_shares,
            status: self.status.after_edit(cmd.actor.role),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_approve(&self, cmd: &ApproveListing) -> Result<Vec<ListingEvent>, DomainError> {
        require(&cmd.actor, can_approve(&cmd.actor), "approve listings")?;
        self.ensure_exists(cmd.listing_id)?;

        Ok(vec![ListingEvent::Approved(ListingApproved {
            listing_id: cmd.listing_id,
            approved_by: cmd.actor.id,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_purchase(&self, cmd: &PurchaseShares) -> Result<Vec<ListingEvent>, DomainError> {
        cmd.validate()?;
        self.ensure_exists(cmd.listing_id)?;
        require(&cmd.buyer, can_purchase(&cmd.buyer), "purchase shares")?;

        if cmd.require_approved && !self.status.is_approved() {
            return Err(DomainError::invariant("listing is pending approval"));
        }
        if self.available_shares < cmd.shares {
            return Err(DomainError::insufficient_supply(
                cmd.shares,
                self.available_shares,
            ));
        }

        let amount = purchase_amount(self.total_price, self.total_shares, cmd.shares)?;
        let price_per_share = price_per_share(self.total_price, self.total_shares)?;

        Ok(vec![ListingEvent::SharesPurchased(SharesPurchased {
            listing_id: cmd.listing_id,
            buyer_id: cmd.buyer.id,
            shares: cmd.shares,
            amount,
            price_per_share,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_delete(&self, cmd: &DeleteListing) -> Result<Vec<ListingEvent>, DomainError> {
        let owner = self.ensure_exists(cmd.listing_id)?;
        require(&cmd.actor, can_edit_listing(&cmd.actor, owner), "delete this listing")?;

        Ok(vec![ListingEvent::Deleted(ListingDeleted {
            listing_id: cmd.listing_id,
            deleted_by: cmd.actor.id,
            occurred_at: cmd.occurred_at,
        })])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn test_time() -> DateTime<Utc> {
        Utc::now()
    }

    fn execute(listing: &mut Listing, cmd: ListingCommand) -> DomainResult<Vec<ListingEvent>> {
        let events = listing.handle(&cmd)?;
        for e in &events {
            listing.apply(e);
        }
        Ok(events)
    }

    fn created_listing(seller: Principal, price: i64, shares: i64) -> Listing {
        let id = ListingId::new();
        let mut listing = Listing::empty(id);
        execute(
            &mut listing,
            ListingCommand::Create(CreateListing {
                listing_id: id,
                seller,
                title: "Harbour loft".to_string(),
                description: String::new(),
                total_price: Decimal::from(price),
                total_shares: shares,
                occurred_at: test_time(),
            }),
        )
        .unwrap();
        listing
    }

    fn purchase(listing_id: ListingId, buyer: Principal, shares: i64) -> ListingCommand {
        ListingCommand::Purchase(PurchaseShares {
            listing_id,
            buyer,
            shares,
            require_approved: false,
            occurred_at: test_time(),
        })
    }

    fn edit(listing_id: ListingId, actor: Principal, total_shares: i64) -> ListingCommand {
        ListingCommand::Edit(EditListing {
            listing_id,
            actor,
            title: "Harbour loft".to_string(),
            description: "renovated".to_string(),
            total_price: Decimal::from(1000),
            total_shares,
            occurred_at: test_time(),
        })
    }

    #[test]
    fn create_starts_pending_with_full_supply() {
        let listing = created_listing(Principal::seller(UserId::new()), 1000, 100);
        assert_eq!(listing.status(), ListingStatus::Pending);
        assert_eq!(listing.available_shares(), 100);
        assert_eq!(listing.version(), 1);

        let view = listing.view().unwrap();
        assert_eq!(view.price_per_share, Decimal::from(10));
        assert_eq!(view.value_remaining, Decimal::from(1000));
    }

    #[test]
    fn create_rejects_buyer_and_bad_terms() {
        let id = ListingId::new();
        let listing = Listing::empty(id);
        let mut cmd = CreateListing {
            listing_id: id,
            seller: Principal::buyer(UserId::new()),
            title: "Loft".to_string(),
            description: String::new(),
            total_price: Decimal::from(100),
            total_shares: 10,
            occurred_at: test_time(),
        };
        assert!(matches!(
            listing.handle(&ListingCommand::Create(cmd.clone())),
            Err(DomainError::Forbidden(_))
        ));

        cmd.seller = Principal::seller(UserId::new());
        cmd.title = "   ".to_string();
        assert!(matches!(
            listing.handle(&ListingCommand::Create(cmd.clone())),
            Err(DomainError::Validation(_))
        ));

        cmd.title = "Loft".to_string();
        cmd.total_price = Decimal::ZERO;
        assert!(matches!(
            listing.handle(&ListingCommand::Create(cmd.clone())),
            Err(DomainError::Validation(_))
        ));

        cmd.total_price = Decimal::from(100);
        cmd.total_shares = 0;
        assert!(matches!(
            listing.handle(&ListingCommand::Create(cmd)),
            Err(DomainError::Validation(_))
        ));
    }

    #[test]
    fn purchase_computes_amount_from_current_price() {
        let mut listing = created_listing(Principal::seller(UserId::new()), 1000, 100);
        let id = listing.id_typed();
        let buyer = Principal::buyer(UserId::new());

        let events = execute(&mut listing, purchase(id, buyer, 30)).unwrap();
        match &events[0] {
            ListingEvent::SharesPurchased(e) => {
                assert_eq!(e.amount, Decimal::from(300));
                assert_eq!(e.price_per_share, Decimal::from(10));
                assert_eq!(e.buyer_id, buyer.id);
            }
            other => panic!("expected SharesPurchased, got {other:?}"),
        }
        assert_eq!(listing.available_shares(), 70);
    }

    #[test]
    fn purchase_boundary_exact_supply_then_one_more() {
        let mut listing = created_listing(Principal::seller(UserId::new()), 500, 5);
        let id = listing.id_typed();
        let buyer = Principal::buyer(UserId::new());

        execute(&mut listing, purchase(id, buyer, 5)).unwrap();
        assert_eq!(listing.available_shares(), 0);

        let before = listing.clone();
        let err = execute(&mut listing, purchase(id, buyer, 1)).unwrap_err();
        assert_eq!(err, DomainError::insufficient_supply(1, 0));
        assert_eq!(listing, before);
    }

    #[test]
    fn purchase_rejects_non_positive_shares_before_lookup() {
        let listing = Listing::empty(ListingId::new());
        let err = listing
            .handle(&purchase(listing.id_typed(), Principal::buyer(UserId::new()), 0))
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));

        let err = listing
            .handle(&purchase(listing.id_typed(), Principal::buyer(UserId::new()), 1))
            .unwrap_err();
        assert_eq!(err, DomainError::NotFound);
    }

    #[test]
    fn purchase_policy_can_block_pending_listings() {
        let listing = created_listing(Principal::seller(UserId::new()), 100, 10);
        let cmd = ListingCommand::Purchase(PurchaseShares {
            listing_id: listing.id_typed(),
            buyer: Principal::buyer(UserId::new()),
            shares: 1,
            require_approved: true,
            occurred_at: test_time(),
        });
        assert!(matches!(
            listing.handle(&cmd),
            Err(DomainError::InvariantViolation(_))
        ));

        // Pending listings are purchasable when the policy allows it.
        assert!(
            listing
                .handle(&purchase(listing.id_typed(), Principal::buyer(UserId::new()), 1))
                .is_ok()
        );
    }

    #[test]
    fn sellers_cannot_purchase() {
        let listing = created_listing(Principal::seller(UserId::new()), 100, 10);
        let err = listing
            .handle(&purchase(listing.id_typed(), Principal::seller(UserId::new()), 1))
            .unwrap_err();
        assert!(matches!(err, DomainError::Forbidden(_)));
    }

    #[test]
    fn edit_resizes_relative_to_sold_shares() {
        let seller = Principal::seller(UserId::new());
        let mut listing = created_listing(seller, 1000, 100);
        let id = listing.id_typed();
        execute(&mut listing, purchase(id, Principal::buyer(UserId::new()), 30)).unwrap();

        execute(&mut listing, edit(id, seller, 50)).unwrap();
        assert_eq!(listing.total_shares(), 50);
        assert_eq!(listing.available_shares(), 20);

        let before = listing.clone();
        let err = execute(&mut listing, edit(id, seller, 20)).unwrap_err();
        assert!(matches!(err, DomainError::InvariantViolation(_)));
        assert_eq!(listing, before);
    }

    #[test]
    fn edit_growing_supply_adds_exactly_the_difference() {
        let seller = Principal::seller(UserId::new());
        let mut listing = created_listing(seller, 1000, 100);
        let id = listing.id_typed();
        execute(&mut listing, purchase(id, Principal::buyer(UserId::new()), 10)).unwrap();

        execute(&mut listing, edit(id, seller, 100)).unwrap();
        assert_eq!(listing.available_shares(), 90);

        execute(&mut listing, edit(id, seller, 125)).unwrap();
        assert_eq!(listing.available_shares(), 115);
    }

    #[test]
    fn owner_edit_returns_to_pending_and_admin_reapproves() {
        let seller = Principal::seller(UserId::new());
        let admin = Principal::admin(UserId::new());
        let mut listing = created_listing(seller, 1000, 100);
        let id = listing.id_typed();
        let approve = ListingCommand::Approve(ApproveListing {
            listing_id: id,
            actor: admin,
            occurred_at: test_time(),
        });

        execute(&mut listing, approve.clone()).unwrap();
        assert_eq!(listing.status(), ListingStatus::Approved);

        execute(&mut listing, edit(id, seller, 100)).unwrap();
        assert_eq!(listing.status(), ListingStatus::Pending);

        execute(&mut listing, approve.clone()).unwrap();
        assert_eq!(listing.status(), ListingStatus::Approved);

        execute(&mut listing, edit(id, admin, 120)).unwrap();
        assert_eq!(listing.status(), ListingStatus::Approved);

        // Re-approving an approved listing is accepted.
        execute(&mut listing, approve).unwrap();
        assert_eq!(listing.status(), ListingStatus::Approved);
    }

    #[test]
    fn edit_by_other_seller_is_forbidden() {
        let listing = created_listing(Principal::seller(UserId::new()), 1000, 100);
        let err = listing
            .handle(&edit(listing.id_typed(), Principal::seller(UserId::new()), 100))
            .unwrap_err();
        assert!(matches!(err, DomainError::Forbidden(_)));
    }

    #[test]
    fn approve_requires_admin() {
        let listing = created_listing(Principal::seller(UserId::new()), 1000, 100);
        let seller = listing.seller_id().map(Principal::seller).unwrap();
        let err = listing
            .handle(&ListingCommand::Approve(ApproveListing {
                listing_id: listing.id_typed(),
                actor: seller,
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::Forbidden(_)));
    }

    #[test]
    fn deleted_listing_no_longer_exists() {
        let seller = Principal::seller(UserId::new());
        let mut listing = created_listing(seller, 1000, 100);
        let id = listing.id_typed();
        execute(
            &mut listing,
            ListingCommand::Delete(DeleteListing {
                listing_id: id,
                actor: seller,
                occurred_at: test_time(),
            }),
        )
        .unwrap();
        assert!(listing.is_deleted());
        assert_eq!(listing.record().unwrap_err(), DomainError::NotFound);
    }

    #[test]
    fn restore_round_trips_record() {
        let listing = created_listing(Principal::seller(UserId::new()), 1000, 100);
        let record = listing.record().unwrap();
        assert_eq!(Listing::restore(record.clone()).record().unwrap(), record);
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            ..ProptestConfig::default()
        })]

        /// Property: for any sequence of purchase requests, accepted shares never
        /// exceed the supply and the remaining count is exact.
        #[test]
        fn purchases_never_oversell(
            total in 1i64..1_000,
            requests in prop::collection::vec(-5i64..200, 1..40)
        ) {
            let mut listing = created_listing(Principal::seller(UserId::new()), 10_000, total);
            let id = listing.id_typed();
            let mut sold = 0i64;

            for shares in requests {
                let buyer = Principal::buyer(UserId::new());
                if execute(&mut listing, purchase(id, buyer, shares)).is_ok() {
                    sold += shares;
                }
            }

            prop_assert!(sold <= total);
            prop_assert_eq!(listing.available_shares(), total - sold);
        }
    }
}
