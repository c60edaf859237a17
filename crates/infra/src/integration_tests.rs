//! Scenario tests for the in-memory engines.
//!
//! Verifies:
//! - Postings are balanced, atomic, and move the right balances
//! - Reversal is accepted once and refused after that
//! - Historical records reject update and delete
//! - Stock levels always equal the sum of their movements, including under
//!   concurrent movements against one pair
//! - Hierarchy, invoice, transfer and history paging behaviour

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::NaiveDate;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    use kore_accounting::{
        AccountType, InvoiceDraftUpdate, InvoiceStatus, InvoiceType, LineInput, NewAccount,
        NewInvoice, PostEntry, ReverseEntry,
    };
    use kore_core::{
        AccountId, Amount, DomainError, ErrorKind, ProductId, Quantity, UserId, WarehouseId,
    };
    use kore_inventory::{ApplyMovement, MovementKind, NewProduct, NewWarehouse, Transfer};

    use crate::error::StoreError;
    use crate::inventory::{HistoryQuery, InMemoryStock, MovementHistory, StockStore};
    use crate::ledger::{InMemoryLedger, LedgerStore, Pagination};

    fn amount(value: Decimal) -> Amount {
        Amount::new(value).unwrap()
    }

    fn qty(value: Decimal) -> Quantity {
        Quantity::new(value).unwrap()
    }

    fn domain(err: StoreError) -> DomainError {
        match err {
            StoreError::Domain(e) => e,
            other => panic!("expected a domain error, got {other:?}"),
        }
    }

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, 1).unwrap()
    }

    async fn open(ledger: &InMemoryLedger, code: &str, account_type: AccountType, parent: Option<AccountId>) -> AccountId {
        ledger
            .open_account(NewAccount {
                code: code.to_string(),
                name: format!("Account {code}"),
                account_type,
                parent,
            })
            .await
            .unwrap()
            .id_typed()
    }

    fn entry(number: &str, lines: Vec<LineInput>) -> PostEntry {
        PostEntry {
            entry_number: number.to_string(),
            date: date(),
            description: "Cash sale".to_string(),
            actor: UserId::new(),
            lines,
        }
    }

    fn transfer_between(debit: AccountId, credit: AccountId, number: &str, value: Decimal) -> PostEntry {
        entry(
            number,
            vec![
                LineInput::debit(debit, value, "in"),
                LineInput::credit(credit, value, "out"),
            ],
        )
    }

    async fn ledger_with_two_accounts() -> (InMemoryLedger, AccountId, AccountId) {
        let ledger = InMemoryLedger::new();
        let cash = open(&ledger, "1000", AccountType::Asset, None).await;
        let revenue = open(&ledger, "4000", AccountType::Income, None).await;
        (ledger, cash, revenue)
    }

    #[tokio::test]
    async fn balanced_entry_moves_both_balances() {
        let (ledger, cash, revenue) = ledger_with_two_accounts().await;

        let posted = ledger
            .post_entry(transfer_between(cash, revenue, "JE-1", dec!(100.00)))
            .await
            .unwrap();

        let (debit, credit) = posted.totals().unwrap();
        assert_eq!(debit, credit);
        assert_eq!(ledger.get_balance(cash).await.unwrap(), amount(dec!(100)));
        assert_eq!(ledger.get_balance(revenue).await.unwrap(), amount(dec!(-100)));
        assert_eq!(
            ledger.get_account(revenue).await.unwrap().natural_balance(),
            amount(dec!(100))
        );
        assert_eq!(ledger.get_entry(posted.id).await.unwrap(), posted);
    }

    #[tokio::test]
    async fn unbalanced_entry_changes_nothing() {
        let (ledger, cash, revenue) = ledger_with_two_accounts().await;

        let err = ledger
            .post_entry(entry(
                "JE-1",
                vec![
                    LineInput::debit(cash, dec!(100.00), "in"),
                    LineInput::credit(revenue, dec!(50.00), "out"),
                ],
            ))
            .await
            .unwrap_err();

        assert_eq!(err.kind(), Some(ErrorKind::Consistency));
        assert!(matches!(domain(err), DomainError::UnbalancedEntry { .. }));
        assert!(ledger.get_balance(cash).await.unwrap().is_zero());
        assert!(ledger.get_balance(revenue).await.unwrap().is_zero());
        assert!(ledger.list_entries(Pagination::default()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn reversal_is_accepted_once() {
        let (ledger, cash, revenue) = ledger_with_two_accounts().await;
        let original = ledger
            .post_entry(transfer_between(cash, revenue, "JE-7", dec!(42.50)))
            .await
            .unwrap();

        let reverse = || ReverseEntry {
            entry_id: original.id,
            actor: UserId::new(),
            description: "Correction".to_string(),
        };
        let reversal = ledger.reverse_entry(reverse()).await.unwrap();
        assert_eq!(reversal.entry_number, "JE-7-REV");
        assert_eq!(reversal.reversal_of, Some(original.id));
        assert_eq!(reversal.description, "Correction of JE-7");
        assert_eq!(reversal.date, original.date);
        assert!(reversal.lines.iter().all(|l| l.description.starts_with("Reversal: ")));

        let err = ledger.reverse_entry(reverse()).await.unwrap_err();
        assert_eq!(domain(err), DomainError::AlreadyReversed(original.id));

        assert!(ledger.is_reversed(original.id).await.unwrap());
        assert!(!ledger.is_reversed(reversal.id).await.unwrap());
        assert!(ledger.get_balance(cash).await.unwrap().is_zero());
        assert!(ledger.get_balance(revenue).await.unwrap().is_zero());
        assert_eq!(ledger.list_entries(Pagination::default()).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn committed_entries_cannot_be_changed() {
        let (ledger, cash, revenue) = ledger_with_two_accounts().await;
        let posted = ledger
            .post_entry(transfer_between(cash, revenue, "JE-1", dec!(10)))
            .await
            .unwrap();

        let mut edited = posted.clone();
        edited.description = "tampered".to_string();
        let err = ledger.update_entry(edited).await.unwrap_err();
        assert_eq!(err.kind(), Some(ErrorKind::Immutability));

        let err = ledger.delete_entry(posted.id).await.unwrap_err();
        assert!(matches!(
            domain(err),
            DomainError::ImmutabilityViolation { operation: "delete", .. }
        ));
        assert_eq!(ledger.get_entry(posted.id).await.unwrap(), posted);
    }

    #[tokio::test]
    async fn duplicate_entry_number_is_rejected() {
        let (ledger, cash, revenue) = ledger_with_two_accounts().await;
        ledger
            .post_entry(transfer_between(cash, revenue, "JE-1", dec!(10)))
            .await
            .unwrap();

        let err = ledger
            .post_entry(transfer_between(cash, revenue, " JE-1 ", dec!(25)))
            .await
            .unwrap_err();
        assert_eq!(domain(err), DomainError::DuplicateEntryNumber("JE-1".to_string()));
        assert_eq!(ledger.get_balance(cash).await.unwrap(), amount(dec!(10)));
    }

    #[tokio::test]
    async fn unknown_and_inactive_accounts_are_refused() {
        let (ledger, cash, revenue) = ledger_with_two_accounts().await;
        let ghost = AccountId::new();

        let err = ledger
            .post_entry(transfer_between(cash, ghost, "JE-1", dec!(5)))
            .await
            .unwrap_err();
        assert_eq!(domain(err), DomainError::UnknownAccount(ghost));

        ledger.set_account_active(revenue, false).await.unwrap();
        let err = ledger
            .post_entry(transfer_between(cash, revenue, "JE-2", dec!(5)))
            .await
            .unwrap_err();
        assert_eq!(domain(err), DomainError::InactiveAccount(revenue));
        assert!(ledger.get_balance(cash).await.unwrap().is_zero());
    }

    #[tokio::test]
    async fn reversal_reaches_accounts_deactivated_since_posting() {
        let (ledger, cash, revenue) = ledger_with_two_accounts().await;
        let original = ledger
            .post_entry(transfer_between(cash, revenue, "JE-1", dec!(30)))
            .await
            .unwrap();
        ledger.set_account_active(revenue, false).await.unwrap();

        let reversal = ledger
            .reverse_entry(ReverseEntry {
                entry_id: original.id,
                actor: UserId::new(),
                description: "Correction".to_string(),
            })
            .await
            .unwrap();
        assert_eq!(reversal.reversal_of, Some(original.id));
        assert!(ledger.get_balance(cash).await.unwrap().is_zero());
        assert!(ledger.get_balance(revenue).await.unwrap().is_zero());

        // Fresh postings are still refused.
        let err = ledger
            .post_entry(transfer_between(cash, revenue, "JE-2", dec!(5)))
            .await
            .unwrap_err();
        assert_eq!(domain(err), DomainError::InactiveAccount(revenue));
    }

    #[tokio::test]
    async fn balance_beyond_column_range_is_refused() {
        let (ledger, cash, revenue) = ledger_with_two_accounts().await;
        let near_max = dec!(999999999999999999.99);
        ledger
            .post_entry(transfer_between(cash, revenue, "JE-1", near_max))
            .await
            .unwrap();

        let err = ledger
            .post_entry(transfer_between(cash, revenue, "JE-2", dec!(1)))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), Some(ErrorKind::Validation));

        let err = ledger
            .post_entry(transfer_between(cash, revenue, "JE-3", Decimal::MAX))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), Some(ErrorKind::Validation));

        assert_eq!(ledger.get_balance(cash).await.unwrap(), amount(near_max));
        assert_eq!(ledger.get_balance(revenue).await.unwrap(), amount(-near_max));
        assert_eq!(ledger.list_entries(Pagination::default()).await.unwrap().len(), 1);
        assert!(ledger.reconcile_balances().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn lines_on_one_account_merge_into_one_delta() {
        let (ledger, cash, revenue) = ledger_with_two_accounts().await;
        ledger
            .post_entry(entry(
                "JE-1",
                vec![
                    LineInput::debit(cash, dec!(30), "a"),
                    LineInput::debit(cash, dec!(20), "b"),
                    LineInput::credit(revenue, dec!(50), "c"),
                ],
            ))
            .await
            .unwrap();
        assert_eq!(ledger.get_balance(cash).await.unwrap(), amount(dec!(50)));
    }

    #[tokio::test]
    async fn chart_of_accounts_hierarchy() {
        let ledger = InMemoryLedger::new();
        let assets = open(&ledger, "1000", AccountType::Asset, None).await;
        let current = open(&ledger, "1100", AccountType::Asset, Some(assets)).await;
        let cash = open(&ledger, "1110", AccountType::Asset, Some(current)).await;
        let bank = open(&ledger, "1120", AccountType::Asset, Some(current)).await;
        let equity = open(&ledger, "3000", AccountType::Equity, None).await;

        let children: Vec<_> = ledger.list_children(current).await.unwrap().iter().map(|a| a.id_typed()).collect();
        assert_eq!(children, vec![cash, bank]);

        let ancestors: Vec<_> = ledger.ancestors(cash).await.unwrap().iter().map(|a| a.id_typed()).collect();
        assert_eq!(ancestors, vec![current, assets]);

        let descendants = ledger.descendants(assets).await.unwrap();
        assert_eq!(descendants.len(), 3);
        assert_eq!(descendants[0].id_typed(), current);

        let err = ledger.set_account_parent(assets, Some(cash)).await.unwrap_err();
        assert_eq!(domain(err), DomainError::HierarchyCycle { account: assets, parent: cash });
        let err = ledger.set_account_parent(cash, Some(cash)).await.unwrap_err();
        assert!(matches!(domain(err), DomainError::HierarchyCycle { .. }));

        let err = ledger.protect_delete(current).await.unwrap_err();
        assert!(matches!(domain(err), DomainError::StillReferenced { by: "account", .. }));

        ledger
            .post_entry(transfer_between(bank, equity, "JE-1", dec!(1000)))
            .await
            .unwrap();
        let err = ledger.delete_account(bank).await.unwrap_err();
        assert!(matches!(domain(err), DomainError::StillReferenced { by: "journal_line", .. }));

        ledger.protect_delete(cash).await.unwrap();
        ledger.delete_account(cash).await.unwrap();
        assert_eq!(domain(ledger.get_account(cash).await.unwrap_err()), DomainError::UnknownAccount(cash));

        let moved = ledger.set_account_parent(bank, None).await.unwrap();
        assert_eq!(moved.parent(), None);
        assert!(ledger.list_children(current).await.unwrap().is_empty());
        assert_eq!(ledger.find_account_by_code("1120").await.unwrap().map(|a| a.id_typed()), Some(bank));
    }

    #[tokio::test]
    async fn duplicate_account_code_is_rejected() {
        let (ledger, _, _) = ledger_with_two_accounts().await;
        let err = ledger
            .open_account(NewAccount {
                code: "1000".to_string(),
                name: "Petty cash".to_string(),
                account_type: AccountType::Asset,
                parent: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(domain(err), DomainError::Duplicate { record: "account", .. }));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_postings_do_not_lose_updates() {
        let ledger = Arc::new(InMemoryLedger::new());
        let cash = open(&ledger, "1000", AccountType::Asset, None).await;
        let bank = open(&ledger, "1010", AccountType::Asset, None).await;
        let revenue = open(&ledger, "4000", AccountType::Income, None).await;

        let mut handles = Vec::new();
        for i in 0..64 {
            let ledger = ledger.clone();
            // Alternate the debit side so tasks lock overlapping account sets.
            let debit = if i % 2 == 0 { cash } else { bank };
            handles.push(tokio::spawn(async move {
                ledger
                    .post_entry(transfer_between(debit, revenue, &format!("JE-{i}"), dec!(1.00)))
                    .await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(ledger.get_balance(cash).await.unwrap(), amount(dec!(32)));
        assert_eq!(ledger.get_balance(bank).await.unwrap(), amount(dec!(32)));
        assert_eq!(ledger.get_balance(revenue).await.unwrap(), amount(dec!(-64)));
        assert!(ledger.reconcile_balances().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn list_entries_pages_newest_first() {
        let (ledger, cash, revenue) = ledger_with_two_accounts().await;
        for i in 1..=5 {
            ledger
                .post_entry(transfer_between(cash, revenue, &format!("JE-{i}"), dec!(1)))
                .await
                .unwrap();
        }
        let page = ledger.list_entries(Pagination::new(Some(2), Some(1))).await.unwrap();
        let numbers: Vec<_> = page.iter().map(|e| e.entry_number.as_str()).collect();
        assert_eq!(numbers, vec!["JE-4", "JE-3"]);
    }

    #[tokio::test]
    async fn back_dated_entries_list_by_entry_date() {
        let (ledger, cash, revenue) = ledger_with_two_accounts().await;
        for (number, day) in [("JE-1", 10), ("JE-2", 2), ("JE-3", 20), ("JE-4", 2)] {
            let mut cmd = transfer_between(cash, revenue, number, dec!(1));
            cmd.date = NaiveDate::from_ymd_opt(2024, 3, day).unwrap();
            ledger.post_entry(cmd).await.unwrap();
        }
        let all = ledger.list_entries(Pagination::default()).await.unwrap();
        let numbers: Vec<_> = all.iter().map(|e| e.entry_number.as_str()).collect();
        assert_eq!(numbers, vec!["JE-3", "JE-1", "JE-4", "JE-2"]);

        let page = ledger.list_entries(Pagination::new(Some(2), Some(1))).await.unwrap();
        let numbers: Vec<_> = page.iter().map(|e| e.entry_number.as_str()).collect();
        assert_eq!(numbers, vec!["JE-1", "JE-4"]);
    }

    fn invoice_cmd(number: &str) -> NewInvoice {
        NewInvoice {
            number: number.to_string(),
            invoice_type: InvoiceType::Customer,
            counterparty: "Acme Ltd".to_string(),
            invoice_date: date(),
            due_date: NaiveDate::from_ymd_opt(2024, 3, 31).unwrap(),
            subtotal: dec!(100.00),
            tax: dec!(20.00),
            total: dec!(120.00),
            journal_entry: None,
            actor: UserId::new(),
        }
    }

    #[tokio::test]
    async fn invoice_lifecycle() {
        let (ledger, cash, revenue) = ledger_with_two_accounts().await;
        let invoice = ledger.create_invoice(invoice_cmd("INV-1")).await.unwrap();
        assert_eq!(invoice.status, InvoiceStatus::Draft);

        let updated = ledger
            .update_draft_invoice(
                invoice.id,
                InvoiceDraftUpdate {
                    counterparty: "Acme Holdings".to_string(),
                    invoice_date: date(),
                    due_date: NaiveDate::from_ymd_opt(2024, 4, 30).unwrap(),
                    subtotal: dec!(200.00),
                    tax: dec!(40.00),
                    total: dec!(240.00),
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.total, amount(dec!(240)));

        let posted = ledger
            .post_entry(transfer_between(cash, revenue, "JE-INV-1", dec!(240)))
            .await
            .unwrap();
        let linked = ledger.link_invoice_entry(invoice.id, posted.id).await.unwrap();
        assert_eq!(linked.journal_entry, Some(posted.id));

        ledger.set_invoice_status(invoice.id, InvoiceStatus::Issued).await.unwrap();
        let err = ledger
            .update_draft_invoice(
                invoice.id,
                InvoiceDraftUpdate {
                    counterparty: "Late edit".to_string(),
                    invoice_date: date(),
                    due_date: date(),
                    subtotal: dec!(1),
                    tax: dec!(0),
                    total: dec!(1),
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(domain(err), DomainError::InvalidTransition { .. }));

        ledger.set_invoice_status(invoice.id, InvoiceStatus::Paid).await.unwrap();
        let err = ledger
            .set_invoice_status(invoice.id, InvoiceStatus::Cancelled)
            .await
            .unwrap_err();
        assert!(matches!(domain(err), DomainError::InvalidTransition { .. }));
        assert_eq!(ledger.get_invoice(invoice.id).await.unwrap().status, InvoiceStatus::Paid);

        let err = ledger.create_invoice(invoice_cmd("INV-1")).await.unwrap_err();
        assert!(matches!(domain(err), DomainError::Duplicate { record: "invoice", .. }));
    }

    // Inventory

    async fn stock_with_pair() -> (InMemoryStock, ProductId, WarehouseId) {
        let stock = InMemoryStock::new();
        let product = stock
            .create_product(NewProduct {
                sku: "SKU-1".to_string(),
                name: "Widget".to_string(),
                description: String::new(),
                category: None,
                unit_cost: dec!(2.50),
            })
            .await
            .unwrap();
        let warehouse = stock.create_warehouse(warehouse_cmd("WH-1")).await.unwrap();
        (stock, product.id, warehouse.id)
    }

    fn warehouse_cmd(code: &str) -> NewWarehouse {
        NewWarehouse {
            code: code.to_string(),
            name: format!("Warehouse {code}"),
            address: String::new(),
        }
    }

    fn movement(product: ProductId, warehouse: WarehouseId, kind: MovementKind, quantity: Decimal) -> ApplyMovement {
        ApplyMovement {
            product,
            warehouse,
            kind,
            quantity,
            reference: "PO-1".to_string(),
            notes: String::new(),
            actor: UserId::new(),
        }
    }

    async fn assert_level_matches_log(stock: &InMemoryStock, product: ProductId, warehouse: WarehouseId) {
        let history = stock
            .history_page(&HistoryQuery::for_product(product).at_warehouse(warehouse).with_limit(HistoryQuery::MAX_LIMIT))
            .await
            .unwrap();
        let replayed: Quantity = history.movements.iter().map(|m| m.delta).sum();
        assert_eq!(stock.get_quantity(product, warehouse).await.unwrap(), replayed);
    }

    #[tokio::test]
    async fn out_beyond_stock_is_refused_and_level_kept() {
        let (stock, product, warehouse) = stock_with_pair().await;
        stock.apply_movement(movement(product, warehouse, MovementKind::In, dec!(10))).await.unwrap();

        let err = stock
            .apply_movement(movement(product, warehouse, MovementKind::Out, dec!(15)))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), Some(ErrorKind::Consistency));
        assert!(matches!(domain(err), DomainError::InsufficientStock { .. }));

        assert_eq!(stock.get_quantity(product, warehouse).await.unwrap(), qty(dec!(10)));
        let history = stock.history_page(&HistoryQuery::for_product(product)).await.unwrap();
        assert_eq!(history.movements.len(), 1);
        assert_level_matches_log(&stock, product, warehouse).await;
    }

    #[tokio::test]
    async fn adjustment_logs_the_difference() {
        let (stock, product, warehouse) = stock_with_pair().await;
        stock.apply_movement(movement(product, warehouse, MovementKind::In, dec!(10))).await.unwrap();

        let adjusted = stock
            .apply_movement(movement(product, warehouse, MovementKind::Adjustment, dec!(7)))
            .await
            .unwrap();
        assert_eq!(adjusted.delta, qty(dec!(-3)));
        assert_eq!(stock.get_quantity(product, warehouse).await.unwrap(), qty(dec!(7)));
        assert_level_matches_log(&stock, product, warehouse).await;
    }

    #[tokio::test]
    async fn level_beyond_column_range_is_refused_and_pair_stays_usable() {
        let (stock, product, warehouse) = stock_with_pair().await;
        let near_max = dec!(999999999999);
        stock.apply_movement(movement(product, warehouse, MovementKind::In, near_max)).await.unwrap();

        let err = stock
            .apply_movement(movement(product, warehouse, MovementKind::In, dec!(1)))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), Some(ErrorKind::Validation));
        let err = stock
            .apply_movement(movement(product, warehouse, MovementKind::In, dec!(40000000000000000000000000000)))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), Some(ErrorKind::Validation));
        assert_eq!(stock.get_quantity(product, warehouse).await.unwrap(), qty(near_max));

        // The level lock is not poisoned by the refused movements.
        stock.apply_movement(movement(product, warehouse, MovementKind::Out, dec!(9))).await.unwrap();
        assert_eq!(
            stock.get_quantity(product, warehouse).await.unwrap(),
            qty(dec!(999999999990))
        );
        assert_level_matches_log(&stock, product, warehouse).await;
    }

    #[tokio::test]
    async fn movement_inputs_are_validated() {
        let (stock, product, warehouse) = stock_with_pair().await;

        let err = stock
            .apply_movement(movement(product, warehouse, MovementKind::In, dec!(-1)))
            .await
            .unwrap_err();
        assert_eq!(domain(err), DomainError::NegativeQuantity(dec!(-1)));

        let err = stock
            .apply_movement(movement(product, warehouse, MovementKind::In, dec!(1.0001)))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), Some(ErrorKind::Validation));

        let ghost = ProductId::new();
        let err = stock
            .apply_movement(movement(ghost, warehouse, MovementKind::In, dec!(1)))
            .await
            .unwrap_err();
        assert_eq!(domain(err), DomainError::UnknownProduct(ghost));

        let nowhere = WarehouseId::new();
        let err = stock
            .apply_movement(movement(product, nowhere, MovementKind::In, dec!(1)))
            .await
            .unwrap_err();
        assert_eq!(domain(err), DomainError::UnknownWarehouse(nowhere));

        // Nothing above left a level row behind.
        assert!(stock.list_stock_levels(product).await.unwrap().is_empty());
        assert!(stock.get_quantity(product, warehouse).await.unwrap().is_zero());
    }

    #[tokio::test]
    async fn rejected_first_movement_creates_no_level() {
        let (stock, product, warehouse) = stock_with_pair().await;
        let err = stock
            .apply_movement(movement(product, warehouse, MovementKind::Out, dec!(1)))
            .await
            .unwrap_err();
        assert!(matches!(domain(err), DomainError::InsufficientStock { .. }));
        assert!(stock.list_stock_levels(product).await.unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_movements_on_one_pair_do_not_lose_updates() {
        const N: usize = 200;
        let (stock, product, warehouse) = stock_with_pair().await;
        let stock = Arc::new(stock);

        let mut handles = Vec::with_capacity(N);
        for _ in 0..N {
            let stock = stock.clone();
            handles.push(tokio::spawn(async move {
                stock
                    .apply_movement(movement(product, warehouse, MovementKind::In, dec!(1)))
                    .await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(
            stock.get_quantity(product, warehouse).await.unwrap(),
            qty(Decimal::from(N as u64))
        );
        assert_level_matches_log(&stock, product, warehouse).await;
        assert!(stock.reconcile_levels().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn movements_cannot_be_changed() {
        let (stock, product, warehouse) = stock_with_pair().await;
        let logged = stock
            .apply_movement(movement(product, warehouse, MovementKind::In, dec!(3)))
            .await
            .unwrap();

        let mut edited = logged.clone();
        edited.delta = qty(dec!(300));
        let err = stock.update_movement(edited).await.unwrap_err();
        assert_eq!(err.kind(), Some(ErrorKind::Immutability));
        let err = stock.delete_movement(logged.clone()).await.unwrap_err();
        assert_eq!(err.kind(), Some(ErrorKind::Immutability));

        let history = stock.history_page(&HistoryQuery::for_product(product)).await.unwrap();
        assert_eq!(history.movements, vec![logged]);
    }

    #[tokio::test]
    async fn transfer_moves_stock_between_warehouses() {
        let (stock, product, source) = stock_with_pair().await;
        let destination = stock.create_warehouse(warehouse_cmd("WH-2")).await.unwrap().id;
        stock.apply_movement(movement(product, source, MovementKind::In, dec!(10))).await.unwrap();

        let cmd = |quantity: Decimal, to: WarehouseId| Transfer {
            product,
            from: source,
            to,
            quantity,
            reference: "TR-1".to_string(),
            notes: String::new(),
            actor: UserId::new(),
        };

        let (out, into) = stock.transfer(cmd(dec!(4), destination)).await.unwrap();
        assert_eq!(out.delta, qty(dec!(-4)));
        assert_eq!(into.delta, qty(dec!(4)));
        assert_eq!(out.kind, MovementKind::Transfer);
        assert_eq!(stock.get_quantity(product, source).await.unwrap(), qty(dec!(6)));
        assert_eq!(stock.get_quantity(product, destination).await.unwrap(), qty(dec!(4)));

        let err = stock.transfer(cmd(dec!(7), destination)).await.unwrap_err();
        assert!(matches!(domain(err), DomainError::InsufficientStock { .. }));
        let err = stock.transfer(cmd(dec!(1), source)).await.unwrap_err();
        assert_eq!(err.kind(), Some(ErrorKind::Validation));

        assert_eq!(stock.get_quantity(product, source).await.unwrap(), qty(dec!(6)));
        assert_eq!(stock.get_quantity(product, destination).await.unwrap(), qty(dec!(4)));
        assert_level_matches_log(&stock, product, source).await;
        assert_level_matches_log(&stock, product, destination).await;
        assert_eq!(stock.list_stock_levels(product).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn movement_history_pages_lazily_newest_first() {
        let (stock, product, warehouse) = stock_with_pair().await;
        for i in 1..=7 {
            stock
                .apply_movement(movement(product, warehouse, MovementKind::In, Decimal::from(i)))
                .await
                .unwrap();
        }
        let stock: Arc<dyn StockStore> = Arc::new(stock);
        let mut history = MovementHistory::new(stock.clone(), HistoryQuery::for_product(product).with_limit(3));

        let first = history.next_page().await.unwrap().unwrap();
        let deltas: Vec<_> = first.iter().map(|m| m.delta).collect();
        assert_eq!(deltas, vec![qty(dec!(7)), qty(dec!(6)), qty(dec!(5))]);
        assert_eq!(history.next_page().await.unwrap().unwrap().len(), 3);
        assert_eq!(history.next_page().await.unwrap().unwrap().len(), 1);
        assert!(history.next_page().await.unwrap().is_none());

        history.restart();
        assert_eq!(history.collect_remaining().await.unwrap().len(), 7);
        assert_eq!(history.next_page().await.unwrap(), None);
    }

    #[tokio::test]
    async fn catalog_rows_in_use_cannot_be_deleted() {
        let (stock, product, warehouse) = stock_with_pair().await;
        let spare = stock.create_warehouse(warehouse_cmd("WH-9")).await.unwrap().id;
        stock.apply_movement(movement(product, warehouse, MovementKind::In, dec!(1))).await.unwrap();

        let err = stock.delete_product(product).await.unwrap_err();
        assert_eq!(err.kind(), Some(ErrorKind::Reference));
        let err = stock.delete_warehouse(warehouse).await.unwrap_err();
        assert!(matches!(domain(err), DomainError::StillReferenced { record: "warehouse", .. }));

        stock.delete_warehouse(spare).await.unwrap();
        assert_eq!(domain(stock.get_warehouse(spare).await.unwrap_err()), DomainError::UnknownWarehouse(spare));

        let err = stock.create_warehouse(warehouse_cmd("WH-1")).await.unwrap_err();
        assert!(matches!(domain(err), DomainError::Duplicate { record: "warehouse", .. }));

        let inactive = stock.set_product_active(product, false).await.unwrap();
        assert!(!inactive.active);
    }

    fn kind_strategy() -> impl proptest::strategy::Strategy<Value = MovementKind> {
        use proptest::prelude::*;
        prop_oneof![
            Just(MovementKind::In),
            Just(MovementKind::Out),
            Just(MovementKind::Adjustment),
        ]
    }

    proptest::proptest! {
        #![proptest_config(proptest::prelude::ProptestConfig::with_cases(32))]

        // Whatever mix of movements is accepted or refused, the cached level
        // equals the replayed log and never goes negative.
        #[test]
        fn level_always_equals_replayed_log(
            steps in proptest::collection::vec((kind_strategy(), 0i64..5_000), 1..40)
        ) {
            let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
            rt.block_on(async {
                let (stock, product, warehouse) = stock_with_pair().await;
                for (kind, milli) in steps {
                    let quantity = Decimal::new(milli, 3);
                    let before = stock.get_quantity(product, warehouse).await.unwrap();
                    match stock.apply_movement(movement(product, warehouse, kind, quantity)).await {
                        Ok(logged) => {
                            let after = stock.get_quantity(product, warehouse).await.unwrap();
                            assert_eq!(after, before + logged.delta);
                        }
                        Err(_) => {
                            assert_eq!(stock.get_quantity(product, warehouse).await.unwrap(), before);
                        }
                    }
                    assert!(!stock.get_quantity(product, warehouse).await.unwrap().is_negative());
                }
                assert_level_matches_log(&stock, product, warehouse).await;
                assert!(stock.reconcile_levels().await.unwrap().is_empty());
            });
        }
    }
}
