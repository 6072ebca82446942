//! Guild-to-shard routing (S5): pool config and the pure routing helper
//! must agree bit-for-bit with Discord's documented formula.

use stormgate_gateway::{pool::HandoffStrategy, shard_id_for_guild, Config};

#[test]
fn pool_shard_count_and_guild_routing_agree() {
    let config = Config::builder("token").shard_count(4).build();
    let pool_config = config.pool_config();

    assert_eq!(pool_config.num_shards, Some(4));

    let guild_id: u64 = 613_425_648_685_547_541;
    let expected = (guild_id >> 22) % 4;
    assert_eq!(shard_id_for_guild(guild_id, 4), expected as u32);
}

#[test]
fn shard_template_produces_consistent_shard_tuples_across_the_range() {
    let config = Config::builder("token").shard_count(8).build();
    let template = config.shard_template();

    for shard_id in 0..8 {
        let shard_config = template(shard_id, 8);
        let rendered = format!("{shard_config:?}");
        assert!(rendered.contains(&format!("shard: Some([{shard_id}, 8])")));
    }
}

#[test]
fn handoff_strategy_defaults_to_graceful() {
    let config = Config::builder("token").build();
    assert_eq!(config.pool_config().handoff_strategy, HandoffStrategy::Graceful);
}
