//! End-to-end engine tests: append, mine, historical state, staging,
//! reorganization, and peer-sync queries against the in-memory store (plus
//! a SQLite smoke test).

use std::collections::BTreeSet;
use std::sync::Arc;

use lodestone::{BlockChain, ChainError, NullPolicy};
use lodestone_core::{Address, Block, CancelToken, PrivateKey, Transaction, TxError, Value};
use lodestone_store::{MemoryStore, SqliteStore, Store};
use lodestone_testkit::{test_timestamp, RenderKind, TagAction};

const DIFFICULTY: u64 = 8;

type MemoryChain = BlockChain<TagAction, MemoryStore<TagAction>, NullPolicy<TagAction>>;

async fn make_chain() -> MemoryChain {
    BlockChain::new(MemoryStore::new(), NullPolicy::new(DIFFICULTY))
        .await
        .unwrap()
}

fn tag_tx(key: &PrivateKey, nonce: i64, tag: &str) -> Transaction<TagAction> {
    let signer = key.to_address();
    Transaction::new(
        key,
        nonce,
        BTreeSet::from([signer]),
        test_timestamp(),
        vec![TagAction::new(signer, tag)],
    )
    .unwrap()
}

/// Mine a block with the given transactions and append it without
/// rendering, the way a competing chain is assembled before a swap.
async fn append_quietly<S: Store<TagAction>>(
    chain: &BlockChain<TagAction, S, NullPolicy<TagAction>>,
    miner: Address,
    transactions: Vec<Transaction<TagAction>>,
) -> Block<TagAction> {
    let index = chain.count().await.unwrap();
    let previous = chain.tip().await.unwrap().map(|b| b.hash());
    let difficulty = if index == 0 { 0 } else { DIFFICULTY };
    let block = Block::mine(
        index,
        difficulty,
        Some(miner),
        previous,
        test_timestamp(),
        transactions,
        index + 1,
        &CancelToken::new(),
    )
    .unwrap();
    chain
        .append_opts(block.clone(), test_timestamp(), true, false)
        .await
        .unwrap();
    block
}

#[tokio::test]
async fn genesis_only() {
    let chain = make_chain().await;
    let anyone = Address::from_bytes([9; 20]);

    assert!(chain.tip().await.unwrap().is_none());
    assert_eq!(chain.count().await.unwrap(), 0);
    assert!(chain.get_state(&anyone, None).await.unwrap().is_none());

    let miner = PrivateKey::from_seed(&[0x10; 32]).to_address();
    let genesis = chain
        .mine_block(miner, test_timestamp(), &CancelToken::new())
        .await
        .unwrap();

    assert_eq!(genesis.index(), 0);
    assert_eq!(genesis.difficulty(), 0);
    assert!(genesis.transactions().is_empty());
    assert_eq!(chain.count().await.unwrap(), 1);
    assert_eq!(chain.tip().await.unwrap().unwrap().hash(), genesis.hash());
    assert_eq!(chain.genesis().await.unwrap().unwrap().hash(), genesis.hash());
}

#[tokio::test]
async fn two_block_linear() {
    let chain = make_chain().await;
    let key = PrivateKey::from_seed(&[0x21; 32]);
    let signer = key.to_address();
    let miner = PrivateKey::from_seed(&[0x22; 32]).to_address();
    let cancel = CancelToken::new();

    chain
        .mine_block(miner, test_timestamp(), &cancel)
        .await
        .unwrap();

    chain
        .stage_transactions(vec![(tag_tx(&key, 0, "lin-a"), true)])
        .await
        .unwrap();
    let block1 = chain
        .mine_block(miner, test_timestamp(), &cancel)
        .await
        .unwrap();
    assert_eq!(block1.transactions().len(), 1);

    chain
        .stage_transactions(vec![(tag_tx(&key, 1, "lin-b"), true)])
        .await
        .unwrap();
    let block2 = chain
        .mine_block(miner, test_timestamp(), &cancel)
        .await
        .unwrap();
    assert_eq!(block2.transactions().len(), 1);

    assert_eq!(
        chain.get_state(&signer, None).await.unwrap(),
        Some(Value::Text("lin-b".into()))
    );
    assert_eq!(
        chain
            .get_state(&signer, Some(block1.hash()))
            .await
            .unwrap(),
        Some(Value::Text("lin-a".into()))
    );
    assert_eq!(chain.get_next_tx_nonce(&signer).await.unwrap(), 2);
    assert_eq!(chain.get_tx_nonce(&signer).await.unwrap(), 2);

    // Mined transactions left the staging pool.
    assert!(chain.staged_transactions().await.unwrap().is_empty());
}

#[tokio::test]
async fn fork_and_swap_renders_in_order() {
    let chain = make_chain().await;
    let key = PrivateKey::from_seed(&[0x31; 32]);
    let signer = key.to_address();
    let miner = PrivateKey::from_seed(&[0x32; 32]).to_address();
    let cancel = CancelToken::new();

    // A five-block chain: genesis plus four tagged blocks.
    let mut blocks = vec![append_quietly(&chain, miner, vec![]).await];
    for nonce in 0..4 {
        let tx = tag_tx(&key, nonce, &format!("fs-{nonce}"));
        blocks.push(append_quietly(&chain, miner, vec![tx]).await);
    }
    assert_eq!(chain.count().await.unwrap(), 5);

    // Fork at block 2; blocks 3 and 4 sit above the branch.
    let branch = blocks[2].hash();
    let fork = chain.fork(branch, &cancel).await.unwrap();
    assert_eq!(fork.count().await.unwrap(), 3);
    assert_eq!(fork.get_next_tx_nonce(&signer).await.unwrap(), 2);

    // Extend the fork with three alternate blocks.
    for (nonce, tag) in [(2, "fs-3p"), (3, "fs-4p"), (4, "fs-5p")] {
        let tx = tag_tx(&key, nonce, tag);
        append_quietly(&fork, miner, vec![tx]).await;
    }
    assert_eq!(fork.count().await.unwrap(), 6);

    let fork_id = fork.id().await;
    chain.swap(&fork, true, &cancel).await.unwrap();

    // The chain now answers as the fork.
    assert_eq!(chain.id().await, fork_id);
    assert_eq!(chain.count().await.unwrap(), 6);
    assert_eq!(
        chain.get_state(&signer, None).await.unwrap(),
        Some(Value::Text("fs-5p".into()))
    );
    assert_eq!(chain.get_next_tx_nonce(&signer).await.unwrap(), 5);
    assert_eq!(
        chain.store().canonical_chain_id().await.unwrap(),
        Some(fork_id)
    );

    // Stale actions unrendered tip-first, new ones rendered in order.
    let log: Vec<_> = TagAction::render_log()
        .into_iter()
        .filter(|record| record.tag.starts_with("fs-"))
        .map(|record| (record.kind, record.tag, record.block_index))
        .collect();
    assert_eq!(
        log,
        vec![
            (RenderKind::Unrender, "fs-3".into(), 4),
            (RenderKind::Unrender, "fs-2".into(), 3),
            (RenderKind::Render, "fs-3p".into(), 3),
            (RenderKind::Render, "fs-4p".into(), 4),
            (RenderKind::Render, "fs-5p".into(), 5),
        ]
    );
}

#[tokio::test]
async fn append_rejects_gapped_nonce() {
    let chain = make_chain().await;
    let key = PrivateKey::from_seed(&[0x41; 32]);
    let miner = PrivateKey::from_seed(&[0x42; 32]).to_address();

    let genesis = append_quietly(&chain, miner, vec![]).await;

    // Nonce 1 where 0 is expected.
    let bad = Block::mine(
        1,
        DIFFICULTY,
        Some(miner),
        Some(genesis.hash()),
        test_timestamp(),
        vec![tag_tx(&key, 1, "gap")],
        99,
        &CancelToken::new(),
    )
    .unwrap();

    let result = chain.append(bad, test_timestamp()).await;
    assert!(matches!(
        result,
        Err(ChainError::InvalidTransaction(TxError::InvalidTxNonce {
            expected: 0,
            actual: 1,
            ..
        }))
    ));

    // The chain is unchanged.
    assert_eq!(chain.count().await.unwrap(), 1);
    assert_eq!(chain.tip().await.unwrap().unwrap().hash(), genesis.hash());
    assert_eq!(chain.get_tx_nonce(&key.to_address()).await.unwrap(), 0);
}

#[tokio::test]
async fn incomplete_states_recovery() {
    let chain = make_chain().await;
    let key = PrivateKey::from_seed(&[0x51; 32]);
    let signer = key.to_address();
    let miner = PrivateKey::from_seed(&[0x52; 32]).to_address();

    append_quietly(&chain, miner, vec![]).await;
    append_quietly(&chain, miner, vec![tag_tx(&key, 0, "rec-a")]).await;

    // Append a block without evaluating it, then plant its state reference
    // the way chain sync does: the reference arrives before the states.
    let tip = chain.tip().await.unwrap().unwrap();
    let unevaluated = Block::mine(
        2,
        DIFFICULTY,
        Some(miner),
        Some(tip.hash()),
        test_timestamp(),
        vec![tag_tx(&key, 1, "rec-b")],
        7,
        &CancelToken::new(),
    )
    .unwrap();
    chain
        .append_opts(unevaluated.clone(), test_timestamp(), false, false)
        .await
        .unwrap();
    let chain_id = chain.id().await;
    chain
        .store()
        .store_state_reference(
            &chain_id,
            &BTreeSet::from([signer]),
            unevaluated.hash(),
            unevaluated.index(),
        )
        .await
        .unwrap();

    let incomplete = chain.get_states(&[signer], None, false).await;
    assert!(matches!(
        incomplete,
        Err(ChainError::IncompleteBlockStates(hash)) if hash == unevaluated.hash()
    ));

    // With complete=true the engine back-fills the missing execution.
    let recovered = chain.get_states(&[signer], None, true).await.unwrap();
    assert_eq!(recovered.get(&signer), Some(&Value::Text("rec-b".into())));

    // The snapshot is persisted; the plain query now succeeds.
    assert_eq!(
        chain.get_state(&signer, None).await.unwrap(),
        Some(Value::Text("rec-b".into()))
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_staging_and_mining() {
    let chain = Arc::new(make_chain().await);
    let alice = PrivateKey::from_seed(&[0x61; 32]);
    let bob = PrivateKey::from_seed(&[0x62; 32]);
    let miner = PrivateKey::from_seed(&[0x63; 32]).to_address();
    let cancel = CancelToken::new();

    append_quietly(chain.as_ref(), miner, vec![]).await;

    // Alice stages a contiguous run; Bob stages nonce 0 plus a gapped pair
    // (nonce 1 is never staged). A third task mines meanwhile.
    let staging_alice = {
        let chain = Arc::clone(&chain);
        let alice = alice.clone();
        tokio::spawn(async move {
            for nonce in 0..4 {
                let tx = tag_tx(&alice, nonce, &format!("con-a{nonce}"));
                chain.stage_transactions(vec![(tx, true)]).await.unwrap();
            }
        })
    };
    let staging_bob = {
        let chain = Arc::clone(&chain);
        let bob = bob.clone();
        tokio::spawn(async move {
            for nonce in [0i64, 2, 3] {
                let tx = tag_tx(&bob, nonce, &format!("con-b{nonce}"));
                chain.stage_transactions(vec![(tx, true)]).await.unwrap();
            }
        })
    };
    let mining = {
        let chain = Arc::clone(&chain);
        let cancel = cancel.clone();
        tokio::spawn(async move {
            let mut mined = Vec::new();
            for _ in 0..2 {
                mined.push(
                    chain
                        .mine_block(miner, test_timestamp(), &cancel)
                        .await
                        .unwrap(),
                );
            }
            mined
        })
    };

    staging_alice.await.unwrap();
    staging_bob.await.unwrap();
    let mut mined = mining.await.unwrap();
    mined.push(
        chain
            .mine_block(miner, test_timestamp(), &cancel)
            .await
            .unwrap(),
    );

    // Every mined block keeps each signer's nonces contiguous with the
    // prefix confirmed before it.
    let mut confirmed: std::collections::BTreeMap<Address, i64> =
        std::collections::BTreeMap::new();
    for block in &mined {
        for tx in block.transactions() {
            let expected = confirmed.get(&tx.signer()).copied().unwrap_or(0);
            assert_eq!(tx.nonce(), expected, "gapped nonce in mined block");
            confirmed.insert(tx.signer(), expected + 1);
        }
    }

    assert_eq!(chain.get_tx_nonce(&alice.to_address()).await.unwrap(), 4);
    // Bob's gapped transactions never made it into a block.
    assert_eq!(chain.get_tx_nonce(&bob.to_address()).await.unwrap(), 1);
    let leftover: BTreeSet<i64> = chain
        .staged_transactions()
        .await
        .unwrap()
        .into_iter()
        .filter(|tx| tx.signer() == bob.to_address())
        .map(|tx| tx.nonce())
        .collect();
    assert_eq!(leftover, BTreeSet::from([2, 3]));
}

#[tokio::test]
async fn make_transaction_assigns_consecutive_nonces() {
    let chain = Arc::new(make_chain().await);
    let key = PrivateKey::from_seed(&[0x71; 32]);
    let target = key.to_address();

    let mut handles = Vec::new();
    for i in 0..4 {
        let chain = Arc::clone(&chain);
        let key = key.clone();
        handles.push(tokio::spawn(async move {
            chain
                .make_transaction(
                    &key,
                    BTreeSet::from([target]),
                    test_timestamp(),
                    vec![TagAction::new(target, &format!("mk-{i}"))],
                )
                .await
                .unwrap()
                .nonce()
        }));
    }

    let mut nonces = Vec::new();
    for handle in handles {
        nonces.push(handle.await.unwrap());
    }
    nonces.sort_unstable();
    assert_eq!(nonces, vec![0, 1, 2, 3]);
    assert_eq!(chain.get_next_tx_nonce(&target).await.unwrap(), 4);
}

#[tokio::test]
async fn block_locator_finds_branch_point() {
    let chain = make_chain().await;
    let miner = PrivateKey::from_seed(&[0x81; 32]).to_address();
    let key = PrivateKey::from_seed(&[0x82; 32]);
    let cancel = CancelToken::new();

    let mut blocks = vec![append_quietly(&chain, miner, vec![]).await];
    for nonce in 0..7 {
        let tx = tag_tx(&key, nonce, &format!("loc-{nonce}"));
        blocks.push(append_quietly(&chain, miner, vec![tx]).await);
    }

    let locator = chain.block_locator(3).await.unwrap();
    assert_eq!(locator.first(), Some(&blocks[7].hash()));
    assert_eq!(locator.last(), Some(&blocks[0].hash()));
    // Strides grow once the threshold is crossed: 7, 6, 5, 3, 0.
    assert_eq!(
        locator,
        vec![
            blocks[7].hash(),
            blocks[6].hash(),
            blocks[5].hash(),
            blocks[3].hash(),
            blocks[0].hash(),
        ]
    );

    // A fork diverging above block 4 locates block 4 as the branch point.
    let fork = chain.fork(blocks[4].hash(), &cancel).await.unwrap();
    for (nonce, tag) in [(4, "loc-alt5"), (5, "loc-alt6")] {
        append_quietly(&fork, miner, vec![tag_tx(&key, nonce, tag)]).await;
    }
    let fork_locator = fork.block_locator(10).await.unwrap();
    assert_eq!(
        chain.find_branch_point(&fork_locator).await.unwrap(),
        Some(blocks[4].hash())
    );

    let next = chain
        .find_next_hashes(&fork_locator, None, 3)
        .await
        .unwrap();
    assert_eq!(
        next,
        vec![blocks[4].hash(), blocks[5].hash(), blocks[6].hash()]
    );
    let stopped = chain
        .find_next_hashes(&fork_locator, Some(blocks[5].hash()), 10)
        .await
        .unwrap();
    assert_eq!(stopped, vec![blocks[4].hash(), blocks[5].hash()]);
}

#[tokio::test]
async fn state_references_always_have_states() {
    let chain = make_chain().await;
    let miner = PrivateKey::from_seed(&[0x91; 32]).to_address();
    let key = PrivateKey::from_seed(&[0x92; 32]);
    let signer = key.to_address();

    append_quietly(&chain, miner, vec![]).await;
    for nonce in 0..3 {
        append_quietly(
            &chain,
            miner,
            vec![tag_tx(&key, nonce, &format!("ref-{nonce}"))],
        )
        .await;
    }

    let chain_id = chain.id().await;
    let references = chain
        .store()
        .iterate_state_references(&chain_id, &signer, None, None, None)
        .await
        .unwrap();
    assert_eq!(references.len(), 3);

    let mut last_index = u64::MAX;
    for (hash, index) in references {
        assert!(index < last_index, "references must descend");
        last_index = index;
        let states = chain.store().get_block_states(&hash).await.unwrap();
        assert!(states.unwrap().contains_key(&signer));
    }
}

#[tokio::test]
async fn sqlite_backed_chain_smoke() {
    let store = SqliteStore::<TagAction>::open_memory().unwrap();
    let chain = BlockChain::new(store, NullPolicy::new(DIFFICULTY))
        .await
        .unwrap();
    let key = PrivateKey::from_seed(&[0xa1; 32]);
    let signer = key.to_address();
    let miner = PrivateKey::from_seed(&[0xa2; 32]).to_address();
    let cancel = CancelToken::new();

    chain
        .mine_block(miner, test_timestamp(), &cancel)
        .await
        .unwrap();
    chain
        .stage_transactions(vec![(tag_tx(&key, 0, "sql-a"), true)])
        .await
        .unwrap();
    let block = chain
        .mine_block(miner, test_timestamp(), &cancel)
        .await
        .unwrap();

    assert_eq!(block.transactions().len(), 1);
    assert_eq!(
        chain.get_state(&signer, None).await.unwrap(),
        Some(Value::Text("sql-a".into()))
    );
    assert_eq!(chain.get_next_tx_nonce(&signer).await.unwrap(), 1);
}

#[tokio::test]
async fn fork_without_divergence_swaps_cleanly() {
    let chain = make_chain().await;
    let miner = PrivateKey::from_seed(&[0xb1; 32]).to_address();
    let key = PrivateKey::from_seed(&[0xb2; 32]);
    let cancel = CancelToken::new();

    let mut blocks = vec![append_quietly(&chain, miner, vec![]).await];
    for nonce in 0..2 {
        blocks.push(
            append_quietly(&chain, miner, vec![tag_tx(&key, nonce, &format!("eq-{nonce}"))])
                .await,
        );
    }

    // Forking at the tip and swapping back is equivalent to a no-op chain
    // replacement: same blocks, same state, same nonces.
    let fork = chain.fork(blocks[2].hash(), &cancel).await.unwrap();
    chain.swap(&fork, false, &cancel).await.unwrap();

    assert_eq!(chain.count().await.unwrap(), 3);
    assert_eq!(chain.tip().await.unwrap().unwrap().hash(), blocks[2].hash());
    assert_eq!(
        chain.get_state(&key.to_address(), None).await.unwrap(),
        Some(Value::Text("eq-1".into()))
    );
    assert_eq!(chain.get_tx_nonce(&key.to_address()).await.unwrap(), 2);
}
