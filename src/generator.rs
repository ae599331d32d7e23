//! Synthetic load-test cases.

use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde_json::json;

use crate::error::{HarnessError, Result};
use crate::types::{ConcreteKind, Job, TestCase, TestKind};

struct Listing {
    title: &'static str,
    category: &'static str,
    brand: &'static str,
    base_price: i64,
}

const LISTINGS: &[Listing] = &[
    Listing { title: "iPhone 12", category: "Mobile", brand: "Apple", base_price: 35000 },
    Listing { title: "Samsung Galaxy S21", category: "Mobile", brand: "Samsung", base_price: 40000 },
    Listing { title: "MacBook Air", category: "Laptop", brand: "Apple", base_price: 65000 },
    Listing { title: "Dell Inspiron", category: "Laptop", brand: "Dell", base_price: 25000 },
    Listing { title: "Sony Camera", category: "Camera", brand: "Sony", base_price: 45000 },
];

const CONDITIONS: &[&str] = &["Like New", "Good", "Fair"];

const LOCATIONS: &[&str] = &["Mumbai", "Delhi", "Bangalore", "Chennai", "Pune"];

const MESSAGES: &[&str] = &[
    "Is this still available?",
    "Can you do 30000? I can pick it up today.",
    "Call me on 98765 43210 to close the deal",
    "WhatsApp me at nine eight seven six five four three two one zero",
    "You are an idiot, nobody will pay that much",
    "Pay outside the platform and I will ship it tomorrow",
    "Does the warranty card come with it?",
];

const CONTEXTS: &[&str] = &["buyer_inquiry", "negotiation", "general"];

/// Builds a seeded generator, or one seeded from OS entropy.
pub fn rng(seed: Option<u64>) -> ChaCha8Rng {
    match seed {
        Some(seed) => ChaCha8Rng::seed_from_u64(seed),
        None => ChaCha8Rng::from_entropy(),
    }
}

/// Generates `count` jobs. For [`TestKind::Mixed`] each job is resolved to
/// price or moderation independently with equal probability.
pub fn generate<R: Rng>(kind: TestKind, count: usize, rng: &mut R) -> Result<Vec<Job>> {
    if count == 0 {
        return Err(HarnessError::Usage("request count must be at least 1".into()));
    }

    Ok((0..count)
        .map(|_| {
            let concrete = resolve(kind, rng);
            Job::new(concrete, synthesize(concrete, rng))
        })
        .collect())
}

fn resolve<R: Rng>(kind: TestKind, rng: &mut R) -> ConcreteKind {
    match kind {
        TestKind::Price => ConcreteKind::Price,
        TestKind::Moderation => ConcreteKind::Moderation,
        TestKind::Mixed => {
            if rng.gen_bool(0.5) {
                ConcreteKind::Price
            } else {
                ConcreteKind::Moderation
            }
        }
    }
}

pub fn synthesize<R: Rng>(kind: ConcreteKind, rng: &mut R) -> TestCase {
    let value = match kind {
        ConcreteKind::Price => {
            let listing = &LISTINGS[rng.gen_range(0..LISTINGS.len())];
            let age_months: i64 = rng.gen_range(1..=48);
            let asking_price = listing.base_price * rng.gen_range(70..=130) / 100;
            json!({
                "title": listing.title,
                "category": listing.category,
                "brand": listing.brand,
                "condition": CONDITIONS.choose(rng).copied().unwrap_or("Good"),
                "age_months": age_months,
                "asking_price": asking_price,
                "location": LOCATIONS.choose(rng).copied().unwrap_or("Mumbai"),
            })
        }
        ConcreteKind::Moderation => json!({
            "message": MESSAGES.choose(rng).copied().unwrap_or(MESSAGES[0]),
            "context": CONTEXTS.choose(rng).copied().unwrap_or("general"),
        }),
    };

    match value {
        serde_json::Value::Object(map) => map,
        _ => TestCase::new(),
    }
}
