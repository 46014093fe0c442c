use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use afd_amg::batch::list_dir;
use afd_amg::{Batch, JobContext, Pipeline, RuleSet};
use afd_config::testing::TestEnvironment;
use afd_log::LogSinks;
use proptest::prelude::*;

fn pipeline(env: &TestEnvironment, rules: &str) -> Pipeline {
    Pipeline::new(env.layout(), Default::default(), Arc::new(RuleSet::parse(rules)), LogSinks::null())
}

fn make_batch(env: &TestEnvironment, files: &[(String, usize)]) -> Batch {
    let contents: Vec<(&str, Vec<u8>)> = files.iter().map(|(n, s)| (n.as_str(), vec![b'z'; *s])).collect();
    let refs: Vec<(&str, &[u8])> = contents.iter().map(|(n, c)| (*n, c.as_slice())).collect();
    let dir = env.create_batch("prop", &refs).unwrap();
    Batch::scan(&dir).unwrap()
}

fn run(p: &Pipeline, batch: &mut Batch, option: &str) {
    p.run(&JobContext::default(), &[option.to_string()], batch);
}

fn sorted(batch: &Batch) -> Vec<(String, i64)> {
    let mut entries = batch.entries();
    entries.sort();
    entries
}

/// Distinct lowercase names with sizes
fn files(max: usize) -> impl Strategy<Value = Vec<(String, usize)>> {
    prop::collection::btree_map("[a-z0-9]{1,8}(\\.[a-z]{1,3})?", 0usize..64, 1..max)
        .prop_map(|m| m.into_iter().collect())
}

/// Distinct names where several may differ only in case
fn case_variants(max_stems: usize) -> impl Strategy<Value = Vec<(String, usize)>> {
    prop::collection::btree_set("[a-z0-9]{1,6}", 1..max_stems)
        .prop_flat_map(|stems| {
            let n = stems.len();
            (
                Just(stems.into_iter().collect::<Vec<_>>()),
                prop::collection::vec(prop::collection::vec(any::<u8>(), 1..4), n),
            )
        })
        .prop_map(|(stems, masks)| {
            let mut names = BTreeMap::new();
            for (stem, variants) in stems.iter().zip(masks) {
                for mask in variants {
                    let name: String = stem
                        .chars()
                        .enumerate()
                        .map(|(i, c)| if mask & (1 << (i % 8)) != 0 { c.to_ascii_uppercase() } else { c })
                        .collect();
                    let size = names.len();
                    names.entry(name).or_insert(size);
                }
            }
            names.into_iter().collect()
        })
}

const OPTIONS: &[&str] = &[
    "toupper",
    "tolower",
    "basename",
    "basename overwrite",
    "extension overwrite",
    "prefix add P_",
    "prefix del P_",
    "srename * same",
    "srename *.* *_*.x overwrite",
    "rename r",
    "convert unix2dos",
    "assemble LBF bundle_%04d",
    "exec true",
    "exec -d false %s",
];

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn buffers_follow_the_directory(
        input in files(12),
        picks in prop::collection::vec(0..OPTIONS.len(), 1..6),
    ) {
        let env = TestEnvironment::new().unwrap();
        let p = pipeline(&env, "[r]\n*.? *\n? single_?\n");
        let mut batch = make_batch(&env, &input);
        for pick in picks {
            run(&p, &mut batch, OPTIONS[pick]);
            prop_assert_eq!(batch.names().len(), batch.sizes().len());
            prop_assert_eq!(batch.files_to_send() as usize, batch.len());
            prop_assert_eq!(batch.sizes().iter().sum::<i64>(), batch.file_size());
            prop_assert_eq!(sorted(&batch), list_dir(batch.dir()).unwrap());
        }
    }

    #[test]
    fn rename_is_idempotent(stems in prop::collection::btree_set("[a-z0-9]{1,8}", 1..10)) {
        let env = TestEnvironment::new().unwrap();
        let p = pipeline(&env, "[r]\n*.txt *.dat\n");
        let input: Vec<(String, usize)> = stems
            .iter()
            .enumerate()
            .map(|(i, s)| (format!("{}.{}", s, if i % 2 == 0 { "txt" } else { "bin" }), i))
            .collect();
        let mut batch = make_batch(&env, &input);
        run(&p, &mut batch, "rename r");
        let once = sorted(&batch);
        run(&p, &mut batch, "rename r");
        prop_assert_eq!(sorted(&batch), once);
    }

    #[test]
    fn collisions_never_merge(n in 2usize..20) {
        let env = TestEnvironment::new().unwrap();
        let p = pipeline(&env, "");
        let input: Vec<(String, usize)> = (0..n).map(|i| (format!("f{:02}", i), i)).collect();
        let mut batch = make_batch(&env, &input);
        run(&p, &mut batch, "srename * out");

        prop_assert_eq!(batch.len(), n);
        let names: BTreeSet<&str> = batch.names().iter().map(String::as_str).collect();
        prop_assert_eq!(names.len(), n);
        prop_assert_eq!(batch.name(0), "out");
        let suffixes: Vec<u32> = batch.names()[1..]
            .iter()
            .map(|name| name.strip_prefix("out-").unwrap().parse().unwrap())
            .collect();
        prop_assert!(suffixes.windows(2).all(|w| w[0] < w[1]));
        prop_assert!(suffixes.iter().all(|&s| s <= 999));
    }

    #[test]
    fn prefix_round_trip(input in files(10)) {
        let env = TestEnvironment::new().unwrap();
        let p = pipeline(&env, "");
        let mut batch = make_batch(&env, &input);
        let before = sorted(&batch);
        run(&p, &mut batch, "prefix add X_");
        prop_assert!(batch.names().iter().all(|n| n.starts_with("X_")));
        run(&p, &mut batch, "prefix del X_");
        prop_assert_eq!(sorted(&batch), before);
    }

    #[test]
    fn upper_then_lower_is_lower(mixed in case_variants(6)) {
        let env_a = TestEnvironment::new().unwrap();
        let p_a = pipeline(&env_a, "");
        let mut a = make_batch(&env_a, &mixed);
        run(&p_a, &mut a, "toupper");
        run(&p_a, &mut a, "tolower");

        let env_b = TestEnvironment::new().unwrap();
        let p_b = pipeline(&env_b, "");
        let mut b = make_batch(&env_b, &mixed);
        run(&p_b, &mut b, "tolower");

        prop_assert_eq!(sorted(&a), sorted(&b));
    }
}

#[test]
fn assemble_counters_step_by_one() {
    let env = TestEnvironment::new().unwrap();
    let p = pipeline(&env, "");
    let ctx = JobContext {
        job_id: 0xabc,
        ..Default::default()
    };
    let mut names = Vec::new();
    for round in 0..2 {
        let dir = env.create_batch(&format!("round{}", round), &[("in", b"data")]).unwrap();
        let mut batch = Batch::scan(&dir).unwrap();
        p.run(&ctx, &["assemble VAX out_%04d".to_string()], &mut batch);
        names.push(batch.name(0).to_string());
    }
    let counter = |name: &str| name["out_".len()..].parse::<u32>().unwrap();
    assert_eq!((counter(&names[0]) + 1) % 10_000, counter(&names[1]));
}
