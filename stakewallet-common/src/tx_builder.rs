//! Transaction builder
//!
//! Produces a fully signed candidate transaction by iterating over the fee:
//! select inputs for `outputs + fee`, compute change, sign, measure, and
//! raise the fee to what the measured size requires until the estimate
//! covers it. The iteration count is capped; running out of iterations is
//! reported as [`WalletError::FeeDidNotConverge`].
//!
//! An explicit input set is never grown. If the fee outgrows it the build
//! fails immediately with [`WalletError::ExplicitInputsInsufficient`].

use bitcoin::absolute::LockTime;
use bitcoin::blockdata::opcodes::all::OP_RETURN;
use bitcoin::blockdata::script::{Builder, PushBytesBuf};
use bitcoin::consensus::encode::serialize;
use bitcoin::{Address, OutPoint, ScriptBuf, Sequence, Transaction, TxIn, TxOut, Witness};
use rand::{Rng, RngCore};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::config::Config;
use crate::error::{WalletError, WalletResult};
use crate::fee_estimation::{FeePolicy, FeePurpose};
use crate::interfaces::{KeyStore, ScriptEngine};
use crate::keypool::ReserveKey;
use crate::logging::{log_transaction, LogLevel};
use crate::types::money_range;
use crate::utxo_selection::{CoinSelector, SelectionStrategy};
use crate::utxo_view::{Coin, CoinFilter, UtxoView};

/// One payment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recipient {
    pub script_pubkey: ScriptBuf,
    pub value: i64,
}

impl Recipient {
    pub fn new(script_pubkey: ScriptBuf, value: i64) -> Self {
        Self {
            script_pubkey,
            value,
        }
    }
}

/// Caller restrictions on inputs and change
#[derive(Debug, Clone, Default)]
pub struct CoinControl {
    /// When non-empty, exactly these outputs are spent
    pub selected: Vec<OutPoint>,
    /// Fixed change destination
    pub change_destination: Option<Address>,
}

impl CoinControl {
    pub fn has_selected(&self) -> bool {
        !self.selected.is_empty()
    }

    pub fn select(&mut self, outpoint: OutPoint) {
        if !self.selected.contains(&outpoint) {
            self.selected.push(outpoint);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PayloadKind {
    /// User message; pays its burn amount
    Message,
    /// Governance contract (poll, vote, beacon); selected smallest-first
    Governance,
}

/// Non-monetary payload, carried in an OP_RETURN output worth `burn`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxPayload {
    pub kind: PayloadKind,
    pub data: Vec<u8>,
    pub burn: u64,
}

impl TxPayload {
    fn output(&self) -> WalletResult<TxOut> {
        let mut builder = Builder::new().push_opcode(OP_RETURN);
        if !self.data.is_empty() {
            let push = PushBytesBuf::try_from(self.data.clone())
                .map_err(|_| WalletError::Validation("Payload too large".to_string()))?;
            builder = builder.push_slice(push);
        }
        Ok(TxOut {
            value: self.burn,
            script_pubkey: builder.into_script(),
        })
    }
}

#[derive(Debug, Clone, Default)]
pub struct BuildRequest {
    pub recipients: Vec<Recipient>,
    /// Explicit, immutable input set
    pub inputs: Vec<OutPoint>,
    pub coin_control: Option<CoinControl>,
    pub payload: Option<TxPayload>,
    /// Overrides the configured change-to-input-address behaviour
    pub change_to_input_address: Option<bool>,
}

impl BuildRequest {
    pub fn pay(recipients: Vec<Recipient>) -> Self {
        Self {
            recipients,
            ..Self::default()
        }
    }

    fn purpose(&self) -> FeePurpose {
        if self.payload.is_some() {
            FeePurpose::Contract
        } else {
            FeePurpose::Standard
        }
    }

    fn coin_control_selected(&self) -> Option<&[OutPoint]> {
        self.coin_control
            .as_ref()
            .filter(|cc| cc.has_selected())
            .map(|cc| cc.selected.as_slice())
    }

    /// Recipient total plus payload burn
    fn value_out(&self) -> WalletResult<u64> {
        if self.recipients.is_empty() {
            return Err(WalletError::Validation("No recipients".to_string()));
        }
        let mut total: u64 = 0;
        for recipient in &self.recipients {
            let value = u64::try_from(recipient.value).map_err(|_| {
                WalletError::Validation(format!("Invalid output value: {}", recipient.value))
            })?;
            total = total.saturating_add(value);
        }
        if let Some(payload) = &self.payload {
            total = total.saturating_add(payload.burn);
        }
        if !money_range(total) {
            return Err(WalletError::Validation(format!(
                "Output total {} is outside the money range",
                total
            )));
        }
        Ok(total)
    }
}

/// Signed candidate transaction
#[derive(Debug, Clone)]
pub struct PendingTransaction {
    pub tx: Transaction,
    pub fee: u64,
    /// Spent coins, in input order
    pub inputs: Vec<Coin>,
    pub change_position: Option<usize>,
    /// Serialized size of `tx`
    pub size: usize,
    /// Fee iterations used
    pub iterations: u32,
    /// Transaction time
    pub time: i64,
}

impl PendingTransaction {
    pub fn input_total(&self) -> u64 {
        self.inputs.iter().map(|c| c.value).sum()
    }

    pub fn change(&self) -> u64 {
        self.change_position
            .map(|pos| self.tx.output[pos].value)
            .unwrap_or(0)
    }
}

/// Policy knobs the builder reads
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildSettings {
    pub cent: u64,
    pub max_tx_size: usize,
    pub max_iterations: u32,
    pub change_to_input_address: bool,
}

impl BuildSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            cent: config.selection.cent,
            max_tx_size: config.policy.max_standard_tx_size,
            max_iterations: config.policy.max_fee_iterations,
            change_to_input_address: config.wallet.change_to_input_address,
        }
    }
}

pub struct TxBuilder<'a> {
    pub view: UtxoView<'a>,
    pub scripts: &'a dyn ScriptEngine,
    pub keys: &'a dyn KeyStore,
    pub fee_policy: &'a dyn FeePolicy,
    pub selector: &'a CoinSelector,
    pub settings: BuildSettings,
    /// Transaction time; coins newer than this are not spent
    pub spend_time: i64,
}

enum InputSource {
    Explicit(Vec<Coin>),
    CoinControl(Vec<Coin>),
    Select {
        candidates: Vec<Coin>,
        strategy: SelectionStrategy,
    },
}

impl<'a> TxBuilder<'a> {
    /// Build and sign a transaction for `request`.
    ///
    /// A change key is reserved from `reserve` only when change goes to a
    /// fresh key; otherwise any reservation is returned. The caller keeps
    /// the key on commit.
    pub fn create_transaction(
        &self,
        request: &BuildRequest,
        reserve: &mut ReserveKey,
        rng: &mut dyn RngCore,
    ) -> WalletResult<PendingTransaction> {
        let value_out = request.value_out()?;
        let purpose = request.purpose();
        let source = self.input_source(request)?;

        let mut fee = self.fee_policy.base_fee(purpose);
        for iteration in 1..=self.settings.max_iterations {
            let target = value_out.saturating_add(fee);

            let inputs = match &source {
                InputSource::Explicit(coins) => coins.clone(),
                InputSource::CoinControl(coins) => {
                    let available: u64 = coins.iter().map(|c| c.value).sum();
                    if available < target {
                        return Err(WalletError::InsufficientFunds {
                            needed: target,
                            available,
                        });
                    }
                    coins.clone()
                }
                InputSource::Select {
                    candidates,
                    strategy,
                } => {
                    self.selector
                        .select_coins(candidates, target, *strategy, self.spend_time, rng)?
                        .selected
                }
            };
            let value_in: u64 = inputs.iter().map(|c| c.value).sum();

            if value_in < target {
                // Only an explicit set can come up short here
                return Err(WalletError::ExplicitInputsInsufficient {
                    available: value_in,
                    required: target,
                });
            }
            let mut change = value_in - target;

            if change > 0 && change < self.settings.cent {
                log_transaction(
                    LogLevel::Debug,
                    "Absorbing sub-cent change into fee",
                    Some(json!({ "change": change, "fee": fee })),
                );
                fee += change;
                change = 0;
            }

            let mut outputs: Vec<TxOut> = request
                .recipients
                .iter()
                .map(|r| TxOut {
                    value: r.value as u64,
                    script_pubkey: r.script_pubkey.clone(),
                })
                .collect();
            if let Some(payload) = &request.payload {
                outputs.push(payload.output()?);
            }

            let change_position = if change > 0 {
                let script = self.change_script(request, &inputs, reserve)?;
                let position = rng.random_range(0..=outputs.len());
                outputs.insert(
                    position,
                    TxOut {
                        value: change,
                        script_pubkey: script,
                    },
                );
                Some(position)
            } else {
                reserve.return_key();
                None
            };

            let mut tx = Transaction {
                version: 1,
                lock_time: LockTime::ZERO,
                input: inputs
                    .iter()
                    .map(|coin| TxIn {
                        previous_output: coin.outpoint,
                        script_sig: ScriptBuf::new(),
                        sequence: Sequence::MAX,
                        witness: Witness::new(),
                    })
                    .collect(),
                output: outputs,
            };

            for (index, coin) in inputs.iter().enumerate() {
                if !self.keys.sign(&mut tx, index, &coin.script_pubkey) {
                    log_transaction(
                        LogLevel::Error,
                        "Failed to sign input",
                        Some(json!({ "input": index, "txid": coin.outpoint.txid.to_string() })),
                    );
                    return Err(WalletError::SigningFailure { input: index });
                }
            }

            let size = serialize(&tx).len();
            if size >= self.settings.max_tx_size {
                return Err(WalletError::SizeLimitExceeded {
                    size,
                    limit: self.settings.max_tx_size,
                });
            }

            let required = self.fee_policy.required_fee(purpose, size);
            log_transaction(
                LogLevel::Debug,
                "Fee iteration",
                Some(json!({
                    "iteration": iteration,
                    "value_in": value_in,
                    "change": change,
                    "size": size,
                    "fee": fee,
                    "required": required,
                })),
            );
            if fee < required {
                fee = required;
                continue;
            }

            log_transaction(
                LogLevel::Info,
                "Transaction built",
                Some(json!({
                    "txid": tx.txid().to_string(),
                    "inputs": inputs.len(),
                    "fee": fee,
                    "size": size,
                })),
            );
            return Ok(PendingTransaction {
                tx,
                fee,
                inputs,
                change_position,
                size,
                iterations: iteration,
                time: self.spend_time,
            });
        }

        Err(WalletError::FeeDidNotConverge {
            iterations: self.settings.max_iterations,
        })
    }

    fn input_source(&self, request: &BuildRequest) -> WalletResult<InputSource> {
        if !request.inputs.is_empty() {
            let coins = self
                .view
                .available_coins(&CoinFilter::explicit(&request.inputs));
            if let Some(missing) = request
                .inputs
                .iter()
                .find(|op| !coins.iter().any(|c| c.outpoint == **op))
            {
                return Err(WalletError::UnknownOutput(*missing));
            }
            return Ok(InputSource::Explicit(coins));
        }

        if let Some(selected) = request.coin_control_selected() {
            let coins = self.view.available_coins(&CoinFilter::explicit(selected));
            return Ok(InputSource::CoinControl(coins));
        }

        let strategy = match &request.payload {
            Some(payload) if payload.kind == PayloadKind::Governance => {
                SelectionStrategy::SmallestFirst
            }
            _ => SelectionStrategy::ConfidenceTiered,
        };
        Ok(InputSource::Select {
            candidates: self.view.available_coins(&CoinFilter::confirmed()),
            strategy,
        })
    }

    /// Change destination: coin control, then the first input address when
    /// requested, then a reserved pool key
    fn change_script(
        &self,
        request: &BuildRequest,
        inputs: &[Coin],
        reserve: &mut ReserveKey,
    ) -> WalletResult<ScriptBuf> {
        if let Some(dest) = request
            .coin_control
            .as_ref()
            .and_then(|cc| cc.change_destination.as_ref())
        {
            return Ok(self.scripts.destination_script(dest));
        }

        let to_input = request
            .change_to_input_address
            .unwrap_or(self.settings.change_to_input_address);
        if to_input {
            if let Some(dest) = inputs
                .iter()
                .find_map(|coin| self.scripts.extract_destination(&coin.script_pubkey))
            {
                return Ok(self.scripts.destination_script(&dest));
            }
            log::warn!("No input has an extractable address, sending change to a new key");
        }

        let pubkey = reserve.get_reserved_key()?;
        Ok(ScriptBuf::new_p2pkh(&pubkey.pubkey_hash()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fee_estimation::StandardFeePolicy;
    use crate::keypool::KeyPool;
    use crate::mock::{
        funding_tx, test_block_hash, test_script, MemoryChainIndex, MemoryStore, MockKeyStore,
        MockScriptEngine,
    };
    use crate::repository::TxMap;
    use crate::types::BlockRef;
    use crate::utxo_view::ViewContext;
    use crate::wallet_tx::WalletTransaction;
    use bitcoin::Txid;
    use rand::rngs::SmallRng;
    use rand::SeedableRng;
    use std::sync::Arc;

    struct Fixture {
        chain: MemoryChainIndex,
        scripts: Arc<MockScriptEngine>,
        keys: Arc<MockKeyStore>,
        pool: Arc<KeyPool>,
        txs: TxMap,
        fees: StandardFeePolicy,
        selector: CoinSelector,
        settings: BuildSettings,
    }

    impl Fixture {
        fn new() -> Self {
            let scripts = Arc::new(MockScriptEngine::new().with_spendable(test_script(1)));
            let keys = Arc::new(MockKeyStore::new().with_script_engine(scripts.clone()));
            let pool = Arc::new(KeyPool::new(keys.clone(), Arc::new(MemoryStore::new()), 3));
            let chain = MemoryChainIndex::new().with_best_height(100).with_time(50_000);
            chain.add_block(test_block_hash(50), 50);
            Self {
                chain,
                scripts,
                keys,
                pool,
                txs: TxMap::new(),
                fees: StandardFeePolicy {
                    transaction_fee: 1,
                    min_tx_fee: 1,
                    contract_min_fee: 1,
                },
                selector: CoinSelector::default(),
                settings: BuildSettings {
                    cent: 3,
                    max_tx_size: 100_000,
                    max_iterations: 32,
                    change_to_input_address: false,
                },
            }
        }

        fn fund(&mut self, nonce: u32, values: &[u64]) -> Txid {
            let outputs: Vec<_> = values.iter().map(|v| (*v, test_script(1))).collect();
            let wtx = WalletTransaction::new(funding_tx(nonce, &outputs), 1_000)
                .with_block(BlockRef::new(test_block_hash(50), 50));
            let txid = wtx.txid();
            self.txs.insert(txid, wtx);
            txid
        }

        fn build(&self, request: &BuildRequest, seed: u64) -> WalletResult<PendingTransaction> {
            let builder = TxBuilder {
                view: UtxoView::new(
                    &self.txs,
                    ViewContext {
                        chain: &self.chain,
                        scripts: self.scripts.as_ref(),
                        min_input_value: 0,
                        maturity_window: 110,
                        stake_min_age: 0,
                    },
                ),
                scripts: self.scripts.as_ref(),
                keys: self.keys.as_ref(),
                fee_policy: &self.fees,
                selector: &self.selector,
                settings: self.settings.clone(),
                spend_time: 50_000,
            };
            let mut reserve = self.pool.reserve_key();
            let mut rng = SmallRng::seed_from_u64(seed);
            let pending = builder.create_transaction(request, &mut reserve, &mut rng)?;
            reserve.keep_key()?;
            Ok(pending)
        }
    }

    fn pay(value: i64) -> BuildRequest {
        BuildRequest::pay(vec![Recipient::new(test_script(7), value)])
    }

    #[test]
    fn test_rejects_invalid_recipients() {
        let fx = Fixture::new();
        assert!(matches!(fx.build(&pay(-1), 1), Err(WalletError::Validation(_))));
        assert!(matches!(
            fx.build(&BuildRequest::default(), 1),
            Err(WalletError::Validation(_))
        ));
    }

    #[test]
    fn test_change_output_inserted_and_balanced() {
        let mut fx = Fixture::new();
        fx.fund(1, &[100]);
        let pending = fx.build(&pay(40), 3).unwrap();

        let position = pending.change_position.unwrap();
        assert_eq!(pending.tx.output.len(), 2);
        assert!(position <= 1);
        assert_eq!(pending.change(), 100 - 40 - pending.fee);
        let out_total: u64 = pending.tx.output.iter().map(|o| o.value).sum();
        assert_eq!(out_total + pending.fee, pending.input_total());
        assert_eq!(
            fx.scripts.classify_ownership(&pending.tx.output[position].script_pubkey),
            crate::types::IsMine::Spendable
        );
    }

    #[test]
    fn test_sub_cent_change_goes_to_fee() {
        let mut fx = Fixture::new();
        fx.fund(2, &[43]);
        let pending = fx.build(&pay(40), 3).unwrap();
        assert_eq!(pending.change_position, None);
        assert_eq!(pending.fee, 3);
        assert_eq!(pending.tx.output.len(), 1);
    }

    #[test]
    fn test_explicit_inputs_never_grow() {
        let mut fx = Fixture::new();
        let txid = fx.fund(3, &[10, 500]);
        let mut request = pay(10);
        request.inputs = vec![OutPoint::new(txid, 0)];
        assert!(matches!(
            fx.build(&request, 1),
            Err(WalletError::ExplicitInputsInsufficient {
                available: 10,
                required: 11
            })
        ));
    }

    #[test]
    fn test_signing_failure_aborts() {
        let mut fx = Fixture::new();
        fx.fund(4, &[100]);
        fx.keys.refuse_to_sign(test_script(1));
        assert!(matches!(
            fx.build(&pay(10), 1),
            Err(WalletError::SigningFailure { input: 0 })
        ));
    }

    #[test]
    fn test_size_limit() {
        let mut fx = Fixture::new();
        fx.fund(5, &[100]);
        fx.settings.max_tx_size = 100;
        assert!(matches!(
            fx.build(&pay(10), 1),
            Err(WalletError::SizeLimitExceeded { limit: 100, .. })
        ));
    }

    #[test]
    fn test_fee_loop_cap() {
        let mut fx = Fixture::new();
        fx.fund(6, &[1_000_000]);
        fx.fees.transaction_fee = 10;
        fx.settings.max_iterations = 1;
        assert!(matches!(
            fx.build(&pay(10), 1),
            Err(WalletError::FeeDidNotConverge { iterations: 1 })
        ));
        fx.settings.max_iterations = 2;
        let pending = fx.build(&pay(10), 1).unwrap();
        assert_eq!(pending.fee, 10);
        assert_eq!(pending.iterations, 2);
    }

    #[test]
    fn test_change_back_to_input_address() {
        let mut fx = Fixture::new();
        fx.fund(7, &[100]);
        let mut request = pay(10);
        request.change_to_input_address = Some(true);
        let pending = fx.build(&request, 5).unwrap();
        let position = pending.change_position.unwrap();
        assert_eq!(pending.tx.output[position].script_pubkey, test_script(1));
        assert_eq!(fx.pool.size(), 0);
    }

    #[test]
    fn test_message_payload_burns() {
        let mut fx = Fixture::new();
        fx.fund(8, &[100]);
        let mut request = pay(10);
        request.payload = Some(TxPayload {
            kind: PayloadKind::Message,
            data: b"hello".to_vec(),
            burn: 20,
        });
        let pending = fx.build(&request, 5).unwrap();
        let burn = pending
            .tx
            .output
            .iter()
            .find(|o| o.script_pubkey.is_op_return())
            .unwrap();
        assert_eq!(burn.value, 20);
        assert_eq!(pending.change(), 100 - 30 - pending.fee);
    }
}
