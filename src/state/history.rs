//! Bounded, most-recent-first transaction history

use crate::error::{TxManagerError, TxManagerResult};
use crate::types::{ExportFormat, HistoryFilter, Transaction};

use std::collections::VecDeque;

/// FIFO-bounded history of transactions that reached a terminal state
#[derive(Debug, Clone)]
pub struct HistoryStore {
    /// Newest entry at the front
    entries: VecDeque<Transaction>,
    limit: usize,
}

impl HistoryStore {
    pub fn new(limit: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(limit.min(1024)),
            limit: limit.max(1),
        }
    }

    /// Prepend a transaction, evicting the oldest entries past the bound
    pub fn record(&mut self, tx: Transaction) {
        // A re-recorded id replaces the earlier copy
        self.entries.retain(|existing| existing.id != tx.id);
        self.entries.push_front(tx);
        while self.entries.len() > self.limit {
            self.entries.pop_back();
        }
    }

    pub fn query(&self, filter: &HistoryFilter) -> Vec<Transaction> {
        let offset = filter.offset.unwrap_or(0);
        let limit = filter.limit.unwrap_or(usize::MAX);

        self.entries
            .iter()
            .filter(|tx| filter.matches(tx))
            .skip(offset)
            .take(limit)
            .cloned()
            .collect()
    }

    pub fn get(&self, id: &str) -> Option<&Transaction> {
        self.entries.iter().find(|tx| tx.id == id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Entries newest first
    pub fn snapshot(&self) -> Vec<Transaction> {
        self.entries.iter().cloned().collect()
    }

    /// Replace contents with previously persisted entries (newest first)
    pub fn restore(&mut self, entries: Vec<Transaction>) {
        self.entries = entries.into_iter().take(self.limit).collect();
    }

    pub fn export(&self, format: ExportFormat) -> TxManagerResult<String> {
        match format {
            ExportFormat::Json => serde_json::to_string_pretty(&self.snapshot())
                .map_err(|e| TxManagerError::Internal(format!("JSON export failed: {}", e))),
            ExportFormat::Csv => Ok(self.export_csv()),
        }
    }

    fn export_csv(&self) -> String {
        let mut out = String::from(
            "id,hash,kind,from,to,value,fee,nonce,chain_id,status,block_number,confirmations,created_at,error\n",
        );

        for tx in &self.entries {
            let row = [
                tx.id.clone(),
                tx.hash.map(|h| format!("{:?}", h)).unwrap_or_default(),
                tx.kind.as_str().to_string(),
                format!("{:?}", tx.from),
                format!("{:?}", tx.to),
                tx.value.to_string(),
                tx.fee.to_string(),
                tx.nonce.to_string(),
                tx.chain_id.to_string(),
                tx.status.to_string(),
                tx.block_number.map(|b| b.to_string()).unwrap_or_default(),
                tx.confirmations.to_string(),
                tx.created_at.to_rfc3339(),
                tx.error.clone().unwrap_or_default(),
            ];
            let line: Vec<String> = row.iter().map(|field| csv_field(field)).collect();
            out.push_str(&line.join(","));
            out.push('\n');
        }

        out
    }
}

fn csv_field(field: &str) -> String {
    if field.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{GasPrice, TxKind, TxStatus};
    use chrono::Utc;
    use ethers::types::{Address, U256};

    fn tx(id: usize, from: Address, to: Address, status: TxStatus) -> Transaction {
        Transaction {
            id: format!("tx-{}", id),
            hash: None,
            from,
            to,
            value: U256::from(id as u64),
            data: None,
            chain_id: 1,
            nonce: id as u64,
            gas_limit: U256::from(21_000u64),
            gas_price: GasPrice::legacy(1u64),
            status,
            block_number: None,
            confirmations: 0,
            created_at: Utc::now(),
            fee: U256::from(21_000u64),
            error: None,
            kind: TxKind::Transfer,
            replaces: None,
        }
    }

    fn alice() -> Address {
        "0x00000000000000000000000000000000000a11ce".parse().unwrap()
    }

    fn bob() -> Address {
        "0x0000000000000000000000000000000000000b0b".parse().unwrap()
    }

    #[test]
    fn test_bound_evicts_oldest_first() {
        let mut history = HistoryStore::new(1000);
        for i in 1..=1001 {
            history.record(tx(i, alice(), bob(), TxStatus::Confirmed));
        }

        assert_eq!(history.len(), 1000);
        assert!(history.get("tx-1").is_none());
        assert!(history.get("tx-2").is_some());
        assert_eq!(history.snapshot()[0].id, "tx-1001");
    }

    #[test]
    fn test_query_by_address_case_insensitive() {
        let carol: Address = "0x00000000000000000000000000000000000ca201".parse().unwrap();
        let mut history = HistoryStore::new(10);
        history.record(tx(1, alice(), bob(), TxStatus::Confirmed));
        history.record(tx(2, bob(), alice(), TxStatus::Failed));
        history.record(tx(3, bob(), carol, TxStatus::Confirmed));

        let filter = HistoryFilter::for_address("0x00000000000000000000000000000000000A11CE");
        let ids: Vec<_> = history.query(&filter).into_iter().map(|t| t.id).collect();
        assert_eq!(ids, vec!["tx-2", "tx-1"]);

        let filter = HistoryFilter {
            address: Some(format!("{:?}", bob())),
            status: Some(TxStatus::Confirmed),
            ..Default::default()
        };
        let ids: Vec<_> = history.query(&filter).into_iter().map(|t| t.id).collect();
        assert_eq!(ids, vec!["tx-3", "tx-1"]);
    }

    #[test]
    fn test_query_pagination() {
        let mut history = HistoryStore::new(10);
        for i in 1..=5 {
            history.record(tx(i, alice(), bob(), TxStatus::Confirmed));
        }

        let filter = HistoryFilter {
            limit: Some(2),
            offset: Some(1),
            ..Default::default()
        };
        let ids: Vec<_> = history.query(&filter).into_iter().map(|t| t.id).collect();
        assert_eq!(ids, vec!["tx-4", "tx-3"]);

        let filter = HistoryFilter {
            offset: Some(10),
            ..Default::default()
        };
        assert!(history.query(&filter).is_empty());
    }

    #[test]
    fn test_export_does_not_mutate() {
        let mut history = HistoryStore::new(10);
        let mut failed = tx(1, alice(), bob(), TxStatus::Failed);
        failed.error = Some("nonce too low, \"retry\"".to_string());
        history.record(failed);
        history.record(tx(2, alice(), bob(), TxStatus::Confirmed));

        let csv = history.export(ExportFormat::Csv).unwrap();
        let lines: Vec<_> = csv.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("id,hash,kind"));
        assert!(lines[2].ends_with("\"nonce too low, \"\"retry\"\"\""));

        let json = history.export(ExportFormat::Json).unwrap();
        let parsed: Vec<Transaction> = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.len(), 2);
        assert_eq!(history.len(), 2);
    }

    #[test]
    fn test_restore_respects_limit() {
        let mut history = HistoryStore::new(2);
        history.restore(vec![
            tx(3, alice(), bob(), TxStatus::Confirmed),
            tx(2, alice(), bob(), TxStatus::Confirmed),
            tx(1, alice(), bob(), TxStatus::Confirmed),
        ]);
        let ids: Vec<_> = history.snapshot().into_iter().map(|t| t.id).collect();
        assert_eq!(ids, vec!["tx-3", "tx-2"]);
    }
}
