use rand::Rng;
use rand::seq::IndexedRandom;

const ADJECTIVES: &[&str] = &["abiding", "adorable", "heavenly", "rampant", "wandering", "cuddly"];

const NOUNS: &[&str] = &["tinsel", "holly", "mistletoe", "candy canes", "pudding", "icicles"];

/// A random `<adjective>-<noun>-<0..99>` name for chats created without one.
pub fn generate_chat_name() -> String {
    let mut rng = rand::rng();
    let a = ADJECTIVES.choose(&mut rng).copied().unwrap_or("merry");
    let b = NOUNS.choose(&mut rng).copied().unwrap_or("snow");
    let postfix: u8 = rng.random_range(0..100);

    format!("{}-{}-{}", a, b, postfix)
}
