//! End-to-end scenarios spanning parsing, signature hashing, script
//! evaluation, and the program driver.

use bllvm_chain::chain::context::Forks;
use bllvm_chain::chain::input::Input;
use bllvm_chain::chain::output::Output;
use bllvm_chain::chain::point::Outpoint;
use bllvm_chain::chain::script::{opcode, Script};
use bllvm_chain::chain::transaction::Transaction;
use bllvm_chain::chain::witness::Witness;
use bllvm_chain::program;
use bllvm_chain::sighash;
use secp256k1::{rand, Keypair, Secp256k1};

fn p2pkh_script(pubkey_hash: &[u8]) -> Script {
    let mut bytes = vec![opcode::DUP, opcode::HASH160, 20];
    bytes.extend_from_slice(pubkey_hash);
    bytes.push(opcode::EQUALVERIFY);
    bytes.push(opcode::CHECKSIG);
    Script::parse(&bytes).unwrap()
}

#[test]
fn p2pkh_round_trip_spend_succeeds() {
    let secp = Secp256k1::new();
    let secret = secp256k1::SecretKey::new(&mut rand::thread_rng());
    let public = secp256k1::PublicKey::from_secret_key(&secp, &secret);
    let pubkey_bytes = public.serialize().to_vec();
    let pubkey_hash = bllvm_chain::hash::hash160(&pubkey_bytes);
    let prevout_script = p2pkh_script(&pubkey_hash);

    let spend_tx = Transaction::new(
        1,
        vec![Input::new(Outpoint::new([9u8; 32], 0), Script::empty(), 0xffff_ffff, Witness::empty())
            .with_prevout(5000, prevout_script.clone())],
        vec![Output::new(4000, Script::parse(&[0x51]).unwrap())],
        0,
    );
    spend_tx.prepare();

    let digest = sighash::legacy_sighash(&spend_tx, 0, &prevout_script, &[], sighash::SIGHASH_ALL).unwrap();
    let message = secp256k1::Message::from_digest(digest);
    let sig = secp.sign_ecdsa(&message, &secret);
    let mut sig_bytes = sig.serialize_der().to_vec();
    sig_bytes.push(sighash::SIGHASH_ALL);

    let mut unlocking_bytes = vec![sig_bytes.len() as u8];
    unlocking_bytes.extend_from_slice(&sig_bytes);
    unlocking_bytes.push(pubkey_bytes.len() as u8);
    unlocking_bytes.extend_from_slice(&pubkey_bytes);
    let unlocking = Script::parse(&unlocking_bytes).unwrap();

    let tx = Transaction::new(
        1,
        vec![Input::new(Outpoint::new([9u8; 32], 0), unlocking, 0xffff_ffff, Witness::empty()).with_prevout(5000, prevout_script)],
        vec![Output::new(4000, Script::parse(&[0x51]).unwrap())],
        0,
    );
    tx.prepare();
    assert!(program::connect(&tx, 0, Forks::all().reduce()).is_ok());
}

#[test]
fn p2sh_wrapped_2_of_3_multisig_succeeds() {
    let secp = Secp256k1::new();
    let keys: Vec<_> = (0..3).map(|_| secp256k1::SecretKey::new(&mut rand::thread_rng())).collect();
    let pubkeys: Vec<Vec<u8>> = keys.iter().map(|k| secp256k1::PublicKey::from_secret_key(&secp, k).serialize().to_vec()).collect();

    let mut redeem_bytes = vec![opcode::PUSH_POSITIVE_1 + 1]; // OP_2
    for pk in &pubkeys {
        redeem_bytes.push(pk.len() as u8);
        redeem_bytes.extend_from_slice(pk);
    }
    redeem_bytes.push(opcode::PUSH_POSITIVE_1 + 2); // OP_3
    redeem_bytes.push(opcode::CHECKMULTISIG);
    let redeem_script = Script::parse(&redeem_bytes).unwrap();
    let redeem_hash = bllvm_chain::hash::hash160(&redeem_bytes);

    let mut prevout_bytes = vec![opcode::HASH160, 20];
    prevout_bytes.extend_from_slice(&redeem_hash);
    prevout_bytes.push(opcode::EQUAL);
    let prevout_script = Script::parse(&prevout_bytes).unwrap();

    let base_tx = Transaction::new(
        1,
        vec![Input::new(Outpoint::new([3u8; 32], 1), Script::empty(), 0xffff_ffff, Witness::empty()).with_prevout(2000, prevout_script.clone())],
        vec![Output::new(1800, Script::parse(&[0x51]).unwrap())],
        0,
    );
    base_tx.prepare();

    let digest = sighash::legacy_sighash(&base_tx, 0, &redeem_script, &[], sighash::SIGHASH_ALL).unwrap();
    let message = secp256k1::Message::from_digest(digest);
    let mut sig0 = secp.sign_ecdsa(&message, &keys[0]).serialize_der().to_vec();
    sig0.push(sighash::SIGHASH_ALL);
    let mut sig1 = secp.sign_ecdsa(&message, &keys[1]).serialize_der().to_vec();
    sig1.push(sighash::SIGHASH_ALL);

    let mut unlocking_bytes = vec![opcode::PUSH_SIZE_0]; // CHECKMULTISIG off-by-one dummy
    unlocking_bytes.push(sig0.len() as u8);
    unlocking_bytes.extend_from_slice(&sig0);
    unlocking_bytes.push(sig1.len() as u8);
    unlocking_bytes.extend_from_slice(&sig1);
    unlocking_bytes.push(redeem_bytes.len() as u8);
    unlocking_bytes.extend_from_slice(&redeem_bytes);
    let unlocking = Script::parse(&unlocking_bytes).unwrap();

    let tx = Transaction::new(
        1,
        vec![Input::new(Outpoint::new([3u8; 32], 1), unlocking, 0xffff_ffff, Witness::empty()).with_prevout(2000, prevout_script)],
        vec![Output::new(1800, Script::parse(&[0x51]).unwrap())],
        0,
    );
    tx.prepare();
    assert!(program::connect(&tx, 0, Forks::all().reduce()).is_ok());
}

#[test]
fn p2wpkh_bip143_spend_succeeds() {
    let secp = Secp256k1::new();
    let secret = secp256k1::SecretKey::new(&mut rand::thread_rng());
    let public = secp256k1::PublicKey::from_secret_key(&secp, &secret);
    let pubkey_bytes = public.serialize().to_vec();
    let pubkey_hash = bllvm_chain::hash::hash160(&pubkey_bytes);

    let mut prevout_bytes = vec![opcode::PUSH_SIZE_0, 20];
    prevout_bytes.extend_from_slice(&pubkey_hash);
    let prevout_script = Script::parse(&prevout_bytes).unwrap();

    let mut script_code_bytes = vec![opcode::DUP, opcode::HASH160, 20];
    script_code_bytes.extend_from_slice(&pubkey_hash);
    script_code_bytes.push(opcode::EQUALVERIFY);
    script_code_bytes.push(opcode::CHECKSIG);
    let script_code = Script::parse(&script_code_bytes).unwrap();

    let base_tx = Transaction::new(
        2,
        vec![Input::new(Outpoint::new([4u8; 32], 0), Script::empty(), 0xffff_ffff, Witness::empty()).with_prevout(6000, prevout_script.clone())],
        vec![Output::new(5500, Script::parse(&[0x51]).unwrap())],
        0,
    );
    base_tx.prepare();

    let digest = sighash::v0_sighash(&base_tx, 0, &script_code, 6000, sighash::SIGHASH_ALL).unwrap();
    let message = secp256k1::Message::from_digest(digest);
    let mut sig = secp.sign_ecdsa(&message, &secret).serialize_der().to_vec();
    sig.push(sighash::SIGHASH_ALL);

    let witness = Witness::new(vec![sig, pubkey_bytes]);
    let tx = Transaction::new(
        2,
        vec![Input::new(Outpoint::new([4u8; 32], 0), Script::empty(), 0xffff_ffff, witness).with_prevout(6000, prevout_script)],
        vec![Output::new(5500, Script::parse(&[0x51]).unwrap())],
        0,
    );
    tx.prepare();
    assert!(program::connect(&tx, 0, Forks::all().reduce()).is_ok());
}

#[test]
fn bip341_keypath_spend_succeeds() {
    let secp = Secp256k1::new();
    let keypair = Keypair::new(&secp, &mut rand::thread_rng());
    let (output_key, _) = secp256k1::XOnlyPublicKey::from_keypair(&keypair);
    let program_bytes = output_key.serialize().to_vec();

    let mut prevout_bytes = vec![opcode::PUSH_POSITIVE_1, 32];
    prevout_bytes.extend_from_slice(&program_bytes);
    let prevout_script = Script::parse(&prevout_bytes).unwrap();

    let base_tx = Transaction::new(
        2,
        vec![Input::new(Outpoint::new([5u8; 32], 0), Script::empty(), 0xffff_ffff, Witness::empty()).with_prevout(7000, prevout_script.clone())],
        vec![Output::new(6500, Script::parse(&[0x51]).unwrap())],
        0,
    );
    base_tx.prepare();

    let digest = sighash::v1_sighash(&base_tx, 0, sighash::SIGHASH_DEFAULT, None, None).unwrap();
    let message = secp256k1::Message::from_digest(digest);
    let sig = secp.sign_schnorr(&message, &keypair);
    let sig_bytes: Vec<u8> = sig.as_ref().to_vec();

    let witness = Witness::new(vec![sig_bytes]);
    let tx = Transaction::new(
        2,
        vec![Input::new(Outpoint::new([5u8; 32], 0), Script::empty(), 0xffff_ffff, witness).with_prevout(7000, prevout_script)],
        vec![Output::new(6500, Script::parse(&[0x51]).unwrap())],
        0,
    );
    tx.prepare();
    assert!(program::connect(&tx, 0, Forks::all().reduce()).is_ok());
}

#[test]
fn op_checklocktimeverify_blocks_premature_spend() {
    // push 1000 (minimal scriptnum: 0xe8, 0x03), OP_CLTV, OP_DROP, OP_1
    let script = Script::parse(&[0x02, 0xe8, 0x03, opcode::CHECKLOCKTIMEVERIFY, opcode::DROP, opcode::PUSH_POSITIVE_1]).unwrap();

    let non_final_input = Input::new(Outpoint::new([6u8; 32], 0), Script::empty(), 0xffff_fffe, Witness::empty());
    let premature_tx = Transaction::new(2, vec![non_final_input], vec![Output::new(100, Script::empty())], 500);
    let mut program = bllvm_chain::interpreter::Program::new(
        vec![],
        Forks::all().reduce(),
        bllvm_chain::interpreter::ScriptVersion::Unversioned,
        Some(bllvm_chain::interpreter::SignatureContext { tx: &premature_tx, input_index: 0, amount: 0, tapleaf_hash: None, annex: None }),
    );
    assert!(program.eval(&script).is_err());
}

#[test]
fn merkle_malleation_rejected_in_block() {
    use bllvm_chain::chain::block::{Block, Header};

    let coinbase = Transaction::new(
        1,
        vec![Input::new(Outpoint::null(), Script::parse(&[0x01, 0x01]).unwrap(), 0xffff_ffff, Witness::empty())],
        vec![Output::new(0, Script::empty())],
        0,
    );
    let spend = Transaction::new(
        1,
        vec![Input::new(Outpoint::new([1u8; 32], 0), Script::empty(), 0xffff_ffff, Witness::empty())],
        vec![Output::new(10, Script::empty())],
        0,
    );
    let header = Header { version: 1, previous: [0u8; 32], merkle_root: [0u8; 32], timestamp: 0, bits: 0, nonce: 0 };
    let block = Block::new(header, vec![coinbase, spend.clone(), spend]);
    assert!(block.is_malleated32());
    assert!(block.check().is_err());
}
