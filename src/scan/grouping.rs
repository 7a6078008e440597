use std::collections::HashSet;

use crate::bridge::Account;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SectionId {
    Importable,
    Creatable,
}

/// One display section of the add-accounts list.
#[derive(Debug, Clone)]
pub struct Section {
    pub id: SectionId,
    pub selectable: bool,
    pub default_selected: bool,
    pub accounts: Vec<Account>,
}

#[derive(Debug, Clone)]
pub struct AccountGroups {
    pub sections: Vec<Section>,
    /// An empty account already in the wallet for this currency, if any. Its
    /// presence suppresses the creatable offer: a second empty account cannot
    /// be created before the first has operations.
    pub already_empty_account: Option<Account>,
}

/// Classify scanned accounts for presentation. Pure and deterministic: same
/// inputs, same groups; recomputed on every state change.
///
/// Importable: initialized accounts not yet in the wallet, selectable and
/// selected by default. Creatable: at most one empty derivable account,
/// surfaced only once the scan has produced it (while scanning, an empty
/// creatable section would only flicker).
pub fn group_add_accounts(
    existing_accounts: &[Account],
    scanned_accounts: &[Account],
    scanning: bool,
) -> AccountGroups {
    let existing_ids: HashSet<&str> = existing_accounts.iter().map(|a| a.id.as_str()).collect();

    let importable: Vec<Account> = scanned_accounts
        .iter()
        .filter(|a| !a.is_empty() && !existing_ids.contains(a.id.as_str()))
        .cloned()
        .collect();

    let already_empty_account = existing_accounts.iter().find(|a| a.is_empty()).cloned();

    let creatable: Vec<Account> = if already_empty_account.is_some() {
        Vec::new()
    } else {
        scanned_accounts
            .iter()
            .filter(|a| a.is_empty() && !existing_ids.contains(a.id.as_str()))
            .take(1)
            .cloned()
            .collect()
    };

    let mut sections = vec![Section {
        id: SectionId::Importable,
        selectable: true,
        default_selected: true,
        accounts: importable,
    }];

    if !scanning || !creatable.is_empty() {
        sections.push(Section {
            id: SectionId::Creatable,
            selectable: true,
            default_selected: false,
            accounts: creatable,
        });
    }

    AccountGroups {
        sections,
        already_empty_account,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    fn account(id: &str, balance: i64, operations: u32) -> Account {
        Account {
            id: id.to_string(),
            currency_id: "bitcoin".to_string(),
            address: format!("addr-{}", id),
            derivation_path: "m/44'/0'/0'/0/0".to_string(),
            balance: Decimal::from(balance),
            block_height: 500,
            operation_count: operations,
        }
    }

    fn section<'a>(groups: &'a AccountGroups, id: SectionId) -> Option<&'a Section> {
        groups.sections.iter().find(|s| s.id == id)
    }

    #[test]
    fn test_partitions_importable_and_creatable() {
        let scanned = vec![account("a", 10, 2), account("b", 0, 0)];
        let groups = group_add_accounts(&[], &scanned, false);

        let importable = section(&groups, SectionId::Importable).unwrap();
        assert_eq!(importable.accounts.len(), 1);
        assert_eq!(importable.accounts[0].id, "a");
        assert!(importable.default_selected);

        let creatable = section(&groups, SectionId::Creatable).unwrap();
        assert_eq!(creatable.accounts.len(), 1);
        assert_eq!(creatable.accounts[0].id, "b");
    }

    #[test]
    fn test_already_imported_accounts_are_excluded() {
        let existing = vec![account("a", 10, 2)];
        let scanned = vec![account("a", 10, 2), account("c", 3, 1)];
        let groups = group_add_accounts(&existing, &scanned, false);

        let importable = section(&groups, SectionId::Importable).unwrap();
        assert_eq!(importable.accounts.len(), 1);
        assert_eq!(importable.accounts[0].id, "c");
    }

    #[test]
    fn test_at_most_one_creatable_slot() {
        let scanned = vec![account("e1", 0, 0), account("e2", 0, 0)];
        let groups = group_add_accounts(&[], &scanned, false);

        let creatable = section(&groups, SectionId::Creatable).unwrap();
        assert_eq!(creatable.accounts.len(), 1);
        assert_eq!(creatable.accounts[0].id, "e1");
    }

    #[test]
    fn test_existing_empty_account_suppresses_creation() {
        let existing = vec![account("old-empty", 0, 0)];
        let scanned = vec![account("e1", 0, 0)];
        let groups = group_add_accounts(&existing, &scanned, false);

        let creatable = section(&groups, SectionId::Creatable).unwrap();
        assert!(creatable.accounts.is_empty());
        assert_eq!(groups.already_empty_account.unwrap().id, "old-empty");
    }

    #[test]
    fn test_creatable_hidden_while_scanning_until_produced() {
        let scanned = vec![account("a", 10, 2)];
        let groups = group_add_accounts(&[], &scanned, true);
        assert!(section(&groups, SectionId::Creatable).is_none());

        let scanned = vec![account("a", 10, 2), account("b", 0, 0)];
        let groups = group_add_accounts(&[], &scanned, true);
        assert!(section(&groups, SectionId::Creatable).is_some());
    }

    #[test]
    fn test_deterministic_for_same_inputs() {
        let existing = vec![account("a", 10, 2)];
        let scanned = vec![account("b", 1, 1), account("c", 0, 0)];

        let first = group_add_accounts(&existing, &scanned, false);
        let second = group_add_accounts(&existing, &scanned, false);

        assert_eq!(first.sections.len(), second.sections.len());
        for (l, r) in first.sections.iter().zip(second.sections.iter()) {
            assert_eq!(l.id, r.id);
            let left_ids: Vec<_> = l.accounts.iter().map(|a| &a.id).collect();
            let right_ids: Vec<_> = r.accounts.iter().map(|a| &a.id).collect();
            assert_eq!(left_ids, right_ids);
        }
    }
}
