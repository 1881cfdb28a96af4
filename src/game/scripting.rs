//! Stat formulas.
//!
//! The core never hard-codes a combat or growth rule; it asks a
//! [`StatScripting`] implementation for precomputed numbers. The server
//! ships [`DefaultScripting`], a table-driven version of the classic
//! formulas. Tests swap in fixed implementations.

use crate::database::magic_db::SkillTemplate;
use crate::game::types::{ClassType, StatDelta};

/// Inputs to one physical attack roll.
#[derive(Debug, Clone, Copy, Default)]
pub struct AttackCtx {
    pub attacker_level: i32,
    pub str_: i32,
    pub dex: i32,
    pub hit_bonus: i32,
    pub dmg_bonus: i32,
    /// Weapon die against small and large targets (0 = bare hands)
    pub weapon_small: i32,
    pub weapon_large: i32,
    pub target_level: i32,
    pub target_ac: i32,
    pub target_large: bool,
    pub ranged: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttackResult {
    pub hit: bool,
    pub damage: i32,
}

/// Inputs to a monster's swing at a player.
#[derive(Debug, Clone, Copy, Default)]
pub struct NpcAttackCtx {
    pub npc_level: i32,
    pub dmg_min: i32,
    pub dmg_max: i32,
    pub target_level: i32,
    pub target_ac: i32,
}

/// Inputs to an attack spell.
#[derive(Debug, Clone, Copy, Default)]
pub struct SkillCtx {
    pub skill_id: i32,
    pub power: i32,
    pub caster_level: i32,
    pub intel: i32,
    pub sp: i32,
    pub target_mr: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SkillDamage {
    pub damage: i32,
    pub hit_count: i32,
    pub drain_mp: i32,
}

pub trait StatScripting: Send + Sync {
    fn melee(&self, ctx: &AttackCtx) -> AttackResult;

    fn npc_attack(&self, ctx: &NpcAttackCtx) -> AttackResult;

    fn skill_damage(&self, ctx: &SkillCtx) -> SkillDamage;

    fn heal(&self, power: i32, caster_level: i32, wis: i32) -> i32;

    /// Stat deltas a buff applies; the tick reverts exactly these on expiry.
    fn buff_effect(&self, skill: &SkillTemplate, caster_level: i32) -> StatDelta;

    /// (HP, MP) after a restart or resurrection.
    fn resurrect_effect(&self, level: i32) -> (i32, i32);

    /// Experience lost on death.
    fn exp_penalty(&self, level: i32, exp: i32) -> i32;

    /// Killer's new lawful value after murdering a lawful player.
    fn pk_lawful(&self, killer_level: i32, killer_lawful: i32) -> i32;

    /// (max HP, max MP) gained on one level up.
    fn level_up(&self, class: ClassType, con: i32, wis: i32) -> (i32, i32);

    /// Total experience needed to reach `level`.
    fn exp_for_level(&self, level: i32) -> i32;

    /// Highest spell tier a class may learn at a level.
    fn spell_tier(&self, class: ClassType, level: i32) -> i32;

    /// Ticks between HP regen pulses at a level.
    fn hp_regen_interval(&self, level: i32) -> u32;

    fn hp_regen(&self, level: i32, con: i32) -> i32;

    fn mp_regen(&self, wis: i32) -> i32;

    /// Where a dead player on `map` comes back.
    fn respawn_point(&self, map: i32) -> (i32, i32, i32);
}

pub const LAWFUL_MIN: i32 = -32768;
pub const LAWFUL_MAX: i32 = 32767;

/// Default town a player respawns in.
pub const RESPAWN_TOWN: (i32, i32, i32) = (33089, 33397, 4);

#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultScripting;

impl DefaultScripting {
    fn roll(max: i32) -> i32 {
        if max <= 0 {
            return 0;
        }
        rand::random_range(1..=max)
    }
}

impl StatScripting for DefaultScripting {
    fn melee(&self, ctx: &AttackCtx) -> AttackResult {
        let stat = if ctx.ranged { ctx.dex } else { ctx.str_ };
        let to_hit = 10 + ctx.attacker_level + ctx.hit_bonus + stat / 2 - ctx.target_level / 2 + (10 - ctx.target_ac) / 2;
        let hit = Self::roll(20) + to_hit >= 20;
        if !hit {
            return AttackResult { hit: false, damage: 0 };
        }
        let die = if ctx.target_large { ctx.weapon_large } else { ctx.weapon_small };
        let base = if die > 0 { Self::roll(die) } else { Self::roll(2) };
        let damage = (base + ctx.dmg_bonus + (stat - 10).max(0) / 2).max(1);
        AttackResult { hit: true, damage }
    }

    fn npc_attack(&self, ctx: &NpcAttackCtx) -> AttackResult {
        let to_hit = 10 + ctx.npc_level - ctx.target_level / 2 + (10 - ctx.target_ac) / 2;
        if Self::roll(20) + to_hit < 20 {
            return AttackResult { hit: false, damage: 0 };
        }
        let lo = ctx.dmg_min.max(1);
        let hi = ctx.dmg_max.max(lo);
        AttackResult { hit: true, damage: rand::random_range(lo..=hi) }
    }

    fn skill_damage(&self, ctx: &SkillCtx) -> SkillDamage {
        let base = ctx.power + Self::roll(ctx.power.max(1) / 2 + 1) + ctx.intel / 2 + ctx.sp;
        let resisted = base * ctx.target_mr.clamp(0, 90) / 100;
        SkillDamage { damage: (base - resisted).max(1), hit_count: 1, drain_mp: 0 }
    }

    fn heal(&self, power: i32, caster_level: i32, wis: i32) -> i32 {
        power + caster_level / 4 + wis / 2 + Self::roll(power.max(1) / 4 + 1)
    }

    fn buff_effect(&self, skill: &SkillTemplate, caster_level: i32) -> StatDelta {
        let mut d = skill.delta;
        if skill.power > 0 {
            d.ac -= caster_level / skill.power.max(1);
        }
        d
    }

    fn resurrect_effect(&self, level: i32) -> (i32, i32) {
        (level.max(1), level / 2)
    }

    fn exp_penalty(&self, level: i32, exp: i32) -> i32 {
        if level < 10 {
            return 0;
        }
        let span = self.exp_for_level(level + 1) - self.exp_for_level(level);
        (span / 20).min(exp.max(0))
    }

    fn pk_lawful(&self, killer_level: i32, killer_lawful: i32) -> i32 {
        let lvl = killer_level.max(1) as i64;
        let scaled = if lvl < 50 { -(lvl * lvl * 4) } else { -(lvl * lvl * lvl * 8 / 100) };
        let floor = killer_lawful as i64 - 1000;
        scaled.min(floor).max(LAWFUL_MIN as i64) as i32
    }

    fn level_up(&self, class: ClassType, con: i32, wis: i32) -> (i32, i32) {
        let (hp_base, mp_base) = class.starting_pools();
        let hp = hp_base / 2 + Self::roll((con - 10).max(1) / 2 + 1);
        let mp = mp_base / 2 + Self::roll((wis - 10).max(1) / 3 + 1);
        (hp.max(1), mp.max(0))
    }

    fn exp_for_level(&self, level: i32) -> i32 {
        let l = (level - 1).max(0) as i64;
        (l * l * 125 + l * 25).min(i32::MAX as i64) as i32
    }

    fn spell_tier(&self, class: ClassType, level: i32) -> i32 {
        let per = match class {
            ClassType::Wizard => 4,
            ClassType::Elf | ClassType::Illusionist => 8,
            ClassType::Crown | ClassType::DarkElf | ClassType::DragonKnight => 10,
            ClassType::Knight => 50,
        };
        (level / per).min(10)
    }

    fn hp_regen_interval(&self, level: i32) -> u32 {
        match level {
            ..=10 => 5,
            11..=25 => 4,
            26..=50 => 3,
            _ => 2,
        }
    }

    fn hp_regen(&self, level: i32, con: i32) -> i32 {
        1 + level / 10 + (con - 12).max(0) / 2
    }

    fn mp_regen(&self, wis: i32) -> i32 {
        match wis {
            ..=11 => 1,
            12..=14 => 2,
            15..=17 => 3,
            _ => 4,
        }
    }

    fn respawn_point(&self, _map: i32) -> (i32, i32, i32) {
        RESPAWN_TOWN
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    /// Always hits for a fixed amount and otherwise defers to the defaults.
    pub struct Fixed(pub i32);

    impl StatScripting for Fixed {
        fn melee(&self, _ctx: &AttackCtx) -> AttackResult {
            AttackResult { hit: true, damage: self.0 }
        }
        fn npc_attack(&self, _ctx: &NpcAttackCtx) -> AttackResult {
            AttackResult { hit: true, damage: self.0 }
        }
        fn skill_damage(&self, _ctx: &SkillCtx) -> SkillDamage {
            SkillDamage { damage: self.0, hit_count: 1, drain_mp: 0 }
        }
        fn heal(&self, power: i32, _lvl: i32, _wis: i32) -> i32 {
            power
        }
        fn buff_effect(&self, skill: &SkillTemplate, _lvl: i32) -> StatDelta {
            skill.delta
        }
        fn resurrect_effect(&self, level: i32) -> (i32, i32) {
            DefaultScripting.resurrect_effect(level)
        }
        fn exp_penalty(&self, _level: i32, exp: i32) -> i32 {
            exp / 10
        }
        fn pk_lawful(&self, level: i32, lawful: i32) -> i32 {
            DefaultScripting.pk_lawful(level, lawful)
        }
        fn level_up(&self, _class: ClassType, _con: i32, _wis: i32) -> (i32, i32) {
            (10, 5)
        }
        fn exp_for_level(&self, level: i32) -> i32 {
            (level - 1) * 100
        }
        fn spell_tier(&self, class: ClassType, level: i32) -> i32 {
            DefaultScripting.spell_tier(class, level)
        }
        fn hp_regen_interval(&self, level: i32) -> u32 {
            DefaultScripting.hp_regen_interval(level)
        }
        fn hp_regen(&self, level: i32, con: i32) -> i32 {
            DefaultScripting.hp_regen(level, con)
        }
        fn mp_regen(&self, wis: i32) -> i32 {
            DefaultScripting.mp_regen(wis)
        }
        fn respawn_point(&self, map: i32) -> (i32, i32, i32) {
            DefaultScripting.respawn_point(map)
        }
    }
}
