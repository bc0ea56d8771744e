use super::reader_builder;
use crate::domain::account::{Account, AccountId, Balance};
use crate::error::{LedgerError, Result};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::io::Read;

#[derive(Debug, Deserialize)]
struct AccountRecord {
    id: String,
    #[serde(default)]
    name: String,
    balance: Decimal,
    credit_limit: Decimal,
}

impl TryFrom<AccountRecord> for Account {
    type Error = LedgerError;

    fn try_from(record: AccountRecord) -> Result<Self> {
        Account::new(
            AccountId::new(record.id)?,
            record.name,
            Balance::new(record.balance),
            Balance::new(record.credit_limit),
        )
    }
}

/// Reads seed accounts (`id,name,balance,credit_limit`) from a CSV source.
pub struct AccountReader<R: Read> {
    reader: csv::Reader<R>,
}

impl<R: Read> AccountReader<R> {
    pub fn new(source: R) -> Self {
        Self {
            reader: reader_builder().from_reader(source),
        }
    }

    /// Lazily yields one validated account per row.
    pub fn accounts(self) -> impl Iterator<Item = Result<Account>> {
        self.reader
            .into_deserialize::<AccountRecord>()
            .map(|row| row.map_err(LedgerError::from).and_then(Account::try_from))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_reader_valid_accounts() {
        let data = "id, name, balance, credit_limit\n\
                    acc-1, Alice, 500, 1000\n\
                    acc-2, Bob, -20.5, 50";
        let accounts: Vec<Result<Account>> =
            AccountReader::new(data.as_bytes()).accounts().collect();

        assert_eq!(accounts.len(), 2);
        let alice = accounts[0].as_ref().unwrap();
        assert_eq!(alice.id.as_str(), "acc-1");
        assert_eq!(alice.name, "Alice");
        assert_eq!(alice.balance, Balance::new(dec!(500)));
        assert_eq!(alice.credit_limit, Balance::new(dec!(1000)));

        let bob = accounts[1].as_ref().unwrap();
        assert_eq!(bob.balance, Balance::new(dec!(-20.5)));
    }

    #[test]
    fn test_reader_rejects_negative_limit_and_blank_id() {
        let data = "id,name,balance,credit_limit\nacc-1,Alice,0,-1\n  ,Nobody,0,0\n\
                    acc-3,Carol,oops,0";
        let accounts: Vec<Result<Account>> =
            AccountReader::new(data.as_bytes()).accounts().collect();

        assert!(matches!(accounts[0], Err(LedgerError::ValidationError(_))));
        assert!(matches!(accounts[1], Err(LedgerError::ValidationError(_))));
        assert!(matches!(accounts[2], Err(LedgerError::CsvError(_))));
    }
}
