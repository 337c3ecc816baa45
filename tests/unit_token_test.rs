use citrinekv::CitrineError;
use citrinekv::core::env::CommitToken;
use std::cmp::Ordering;
use uuid::Uuid;

#[tokio::test]
async fn test_tokens_of_one_environment_are_totally_ordered() {
    let env = Uuid::new_v4();
    let t1 = CommitToken::new(env, 1000);
    let t2 = CommitToken::new(env, 1001);
    assert_eq!(t1.try_compare(&t2).unwrap(), Ordering::Less);
    assert_eq!(t2.try_compare(&t1).unwrap(), Ordering::Greater);
    assert_eq!(t1.try_compare(&t1).unwrap(), Ordering::Equal);
}

#[tokio::test]
async fn test_cross_environment_comparison_is_an_error() {
    let t1 = CommitToken::new(Uuid::new_v4(), 5);
    let t2 = CommitToken::new(Uuid::new_v4(), 5);
    let err = t1.try_compare(&t2).unwrap_err();
    assert!(matches!(err, CitrineError::InvalidComparison));
}

#[tokio::test]
async fn test_wire_form_is_uuid_then_sequence() {
    let env = Uuid::new_v4();
    let token = CommitToken::new(env, 0xDEAD_BEEF);
    let bytes = token.to_bytes();
    assert_eq!(&bytes[..16], env.as_bytes());
    assert_eq!(u64::from_be_bytes(bytes[16..].try_into().unwrap()), 0xDEAD_BEEF);
    assert_eq!(CommitToken::from_bytes(&bytes), token);
}
