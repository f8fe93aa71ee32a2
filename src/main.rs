use ec_pve::*;
use std::collections::BTreeMap;

fn main() {
    let params = new_standard_params();

    // single value under a unified ECC key
    let bob = PrivateKey::generate_ecc().unwrap();
    let bob_pk = bob.public_key().unwrap();
    let x = CurveBN::rand_curve_bn(&params);
    let pve = EcPve::encrypt(&UnifiedPke, &bob_pk, b"backup-1", &params, &x).unwrap();
    pve.verify(&bob_pk, pve.get_q(), b"backup-1").unwrap();
    let restored = pve.decrypt(&bob, &bob_pk, b"backup-1", false).unwrap();
    assert_eq!(x, restored);
    println!("single: {} bytes, restored", pve.to_bytes().len());

    // batch of keys under one RSA key
    let carol = PrivateKey::generate_rsa(2048).unwrap();
    let carol_pk = carol.public_key().unwrap();
    let xs: Vec<CurveBN> = (0..20).map(|_| CurveBN::rand_curve_bn(&params)).collect();
    let batch = EcPveBatch::encrypt(&UnifiedPke, &carol_pk, b"backup-2", &params, &xs).unwrap();
    batch.verify(&carol_pk, batch.get_q(), b"backup-2").unwrap();
    assert_eq!(xs, batch.decrypt(&carol, &carol_pk, b"backup-2", false).unwrap());
    println!("batch: {} values, {} bytes, restored", xs.len(), batch.to_bytes().len());

    // 2-of-3 custodians
    let ac = AccessStructure::new(Node::threshold(
        "root",
        2,
        vec![Node::leaf("p0"), Node::leaf("p1"), Node::leaf("p2")],
    ))
    .unwrap();
    let mut dks = BTreeMap::new();
    let mut pks = BTreeMap::new();
    for leaf in ac.list_leaf_names() {
        let dk = PrivateKey::generate_ecc().unwrap();
        pks.insert(leaf.clone(), dk.public_key().unwrap());
        dks.insert(leaf, dk);
    }
    let shared = EcPveAc::encrypt(&UnifiedPke, &ac, &pks, b"backup-3", &params, &xs).unwrap();
    shared.verify(&ac, &pks, shared.get_q(), b"backup-3").unwrap();

    dks.remove("root/p1");
    let restored = shared
        .decrypt(&ac, &dks, b"backup-3", false, Some(&pks))
        .unwrap();
    assert_eq!(xs, restored);
    println!("quorum {:?}: restored", dks.keys().collect::<Vec<_>>());
}
