use crate::config::Config;
use crate::db::Db;
use crate::errors::ApiError;
use gallows_ledger::quorum::QuorumNetwork;
use gallows_zk::constants::DEFAULT_BATCH_SIZE;
use gallows_zk::groth16::{deserialize_pk, deserialize_vk, serialize_pk, serialize_vk, setup_keys};
use std::sync::Arc;
use tokio::sync::OnceCell;

use ark_bn254::Bn254;
use ark_groth16::{ProvingKey, VerifyingKey};
use rand::rngs::OsRng;

#[derive(Clone)]
pub struct AppState {
    pub db: Db,
    pub config: Arc<Config>,
    pub quorum: Arc<QuorumNetwork>,
    keys: Arc<OnceCell<ZkKeys>>,
}

#[derive(Clone)]
pub struct ZkKeys {
    /// Circuit size the keys were generated for.
    pub batch_size: usize,
    pub pk: Arc<ProvingKey<Bn254>>,
    pub vk: Arc<VerifyingKey<Bn254>>,
}

impl AppState {
    pub fn new(db: Db, config: Config, quorum: QuorumNetwork) -> Self {
        Self {
            db,
            config: Arc::new(config),
            quorum: Arc::new(quorum),
            keys: Arc::new(OnceCell::new()),
        }
    }

    /// State with Groth16 keys already in place, skipping the on-disk setup.
    #[cfg(test)]
    pub fn with_keys(db: Db, config: Config, quorum: QuorumNetwork, keys: ZkKeys) -> Self {
        Self {
            db,
            config: Arc::new(config),
            quorum: Arc::new(quorum),
            keys: Arc::new(OnceCell::new_with(Some(keys))),
        }
    }

    /// Ensure Groth16 keys exist on disk and in memory.
    ///
    /// This runs the trusted setup (prototype) on first use.
    pub async fn ensure_keys(&self) -> Result<ZkKeys, ApiError> {
        let data_dir = self.config.data_dir.clone();

        self.keys
            .get_or_try_init(|| async move {
                tokio::task::spawn_blocking(move || {
                    let keys_dir = data_dir.join("keys");
                    std::fs::create_dir_all(&keys_dir).map_err(|_| ApiError::Internal)?;

                    let pk_path = keys_dir.join(format!("groth16_batch{DEFAULT_BATCH_SIZE}_pk.bin"));
                    let vk_path = keys_dir.join(format!("groth16_batch{DEFAULT_BATCH_SIZE}_vk.bin"));

                    if pk_path.exists() && vk_path.exists() {
                        let pk_bytes = std::fs::read(&pk_path).map_err(|_| ApiError::Internal)?;
                        let vk_bytes = std::fs::read(&vk_path).map_err(|_| ApiError::Internal)?;

                        let pk = deserialize_pk(&pk_bytes)?;
                        let vk = deserialize_vk(&vk_bytes)?;

                        tracing::info!(path = %keys_dir.display(), "loaded groth16 keys");
                        return Ok::<ZkKeys, ApiError>(ZkKeys {
                            batch_size: DEFAULT_BATCH_SIZE,
                            pk: Arc::new(pk),
                            vk: Arc::new(vk),
                        });
                    }

                    // Trusted setup randomness (prototype).
                    //
                    // IMPORTANT: In production, use MPC setup or a transparent proof system.
                    tracing::info!(batch_size = DEFAULT_BATCH_SIZE, "running groth16 setup");
                    let mut rng = OsRng;
                    let (pk, vk) = setup_keys::<DEFAULT_BATCH_SIZE>(&mut rng)?;

                    std::fs::write(&pk_path, serialize_pk(&pk)?).map_err(|_| ApiError::Internal)?;
                    std::fs::write(&vk_path, serialize_vk(&vk)?).map_err(|_| ApiError::Internal)?;

                    Ok::<ZkKeys, ApiError>(ZkKeys {
                        batch_size: DEFAULT_BATCH_SIZE,
                        pk: Arc::new(pk),
                        vk: Arc::new(vk),
                    })
                })
                .await
                .map_err(|_| ApiError::Internal)?
            })
            .await
            .cloned()
    }
}
