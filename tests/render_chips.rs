/*
    Copyright (C) 2020-2023  Rafal Michalski

    This file is part of CHIPSYNTH, a Rust library for emulating sound chips.

    For the full copyright notice, see the lib.rs file.
*/
//! Renders the emulated chips through the host-facing renderer.
use rand::{Rng, SeedableRng};
use rand::rngs::SmallRng;

use chipsynth::audio::{ChipRenderer, RendererConfig};
use chipsynth::chip::{HuC6280, PsgConfig, Sid, SidConfig, SoundChip};
use chipsynth::chip::sid::PAL_CLOCK_HZ;

const HOST_RATE: u32 = 48000;
const PSG_CLOCK: u32 = 3_579_545;

fn psg_renderer() -> ChipRenderer<HuC6280> {
    let psg = HuC6280::new(&PsgConfig::default()).unwrap();
    let config = RendererConfig { host_rate: HOST_RATE, clock_rate: PSG_CLOCK, ..Default::default() };
    ChipRenderer::new(psg, &config).unwrap()
}

fn square_voice(renderer: &mut ChipRenderer<HuC6280>, voice: u8, freq: u16) {
    for &(addr, value) in &[(0, voice), (1, 0xFF), (5, 0xFF)] {
        renderer.write(0, addr, value);
    }
    for i in 0..32 {
        renderer.write(0, 6, if i < 16 { 0x1F } else { 0 });
    }
    for &(addr, value) in &[(2, freq as u8), (3, (freq >> 8) as u8), (4, 0x9F)] {
        renderer.write(0, addr, value);
    }
}

fn peak_to_peak(samples: &[i16]) -> i32 {
    let max = samples.iter().copied().max().unwrap_or(0);
    let min = samples.iter().copied().min().unwrap_or(0);
    i32::from(max) - i32::from(min)
}

#[test]
fn huc6280_square_wave_renders() {
    let mut renderer = psg_renderer();
    assert_eq!(renderer.voice_count(), 6);
    square_voice(&mut renderer, 0, 100);
    let mut left = vec![0i16; 4800];
    let mut right = vec![0i16; 4800];
    assert_eq!(renderer.render(&mut left, &mut right), 4800);
    assert_eq!(renderer.pending_writes(), 0);
    assert_eq!(renderer.read_register(2), 100);
    // the right side is latched by the volume scan 256 ticks in, at ~3.4 samples
    let first = right.iter().position(|&s| s != 0).unwrap();
    assert!(first >= 3 && first < 30, "{}", first);
    for channel in &[&left, &right] {
        let p2p = peak_to_peak(&channel[1000..]);
        assert!(p2p > 9000 && p2p < 14000, "{}", p2p);
    }
    // 32 steps of 200 ticks per cycle
    let scope = renderer.oscilloscope(0).unwrap();
    let events: Vec<_> = scope.iter().skip(3).collect();
    assert!(events.len() > 100);
    for pair in events.windows(2) {
        assert_eq!(pair[1].tick - pair[0].tick, 3200);
        assert_ne!(pair[1].level, pair[0].level);
    }
    let rising = events.iter().find(|ev| ev.level != 0).unwrap();
    let mut trace = [0i16; 4];
    assert!(renderer.oscilloscope_samples(0, rising.tick, 1600, &mut trace));
    assert_eq!(trace, [rising.level, rising.level, 0, 0]);
    for voice in 1..6 {
        assert_eq!(renderer.oscilloscope(voice).unwrap().len(), 1);
    }
}

#[test]
fn huc6280_mixer_saturates() {
    let psg = HuC6280::new(&PsgConfig::default()).unwrap();
    let config = RendererConfig { host_rate: HOST_RATE, clock_rate: PSG_CLOCK, gain: 4.0, ..Default::default() };
    let mut renderer = ChipRenderer::new(psg, &config).unwrap();
    for voice in 0..6 {
        square_voice(&mut renderer, voice, 100);
    }
    let mut left = vec![0i16; 9600];
    let mut right = vec![0i16; 9600];
    assert_eq!(renderer.render(&mut left, &mut right), 9600);
    for channel in &[&left, &right] {
        let settled = &channel[4800..];
        let high = settled.iter().filter(|&&s| s == i16::MAX).count();
        let low = settled.iter().filter(|&&s| s == i16::MIN).count();
        assert!(high > 1000 && low > 1000, "{} {}", high, low);
        // ~85.8 samples per cycle and two zero crossings each, anything more is a wrap
        let flips = settled.windows(2).filter(|w| (w[0] >= 0) != (w[1] >= 0)).count();
        assert!(flips >= 100 && flips <= 2 * 4800 / 85 + 2, "{}", flips);
    }
}

#[test]
fn huc6280_reset_silences() {
    let mut renderer = psg_renderer();
    square_voice(&mut renderer, 2, 300);
    let mut left = vec![0i16; 2000];
    let mut right = vec![0i16; 2000];
    renderer.render(&mut left, &mut right);
    assert!(peak_to_peak(&left[500..]) > 5000);
    renderer.write(100, 4, 0);
    renderer.reset();
    assert_eq!(renderer.pending_writes(), 0);
    renderer.render(&mut left, &mut right);
    assert!(renderer.register_pool().iter().all(|&reg| reg == 0));
    for channel in &[&left, &right] {
        assert!(channel[100..].windows(2).all(|w| (i32::from(w[1]) - i32::from(w[0])).abs() <= 16));
    }
}

#[test]
fn huc6280_random_writes_are_deterministic() {
    fn run(seed: u64) -> Vec<i16> {
        let mut rng = SmallRng::seed_from_u64(seed);
        let mut renderer = psg_renderer();
        square_voice(&mut renderer, 0, 100);
        let mut output = vec![0i16; 2 * 4000];
        let (head, tail) = output.split_at_mut(2 * 800);
        assert_eq!(renderer.render_interleaved(head), 800);
        for chunk in tail.chunks_mut(2 * 800) {
            let mut ts = 0;
            for _ in 0..50 {
                ts += rng.gen_range(0..300);
                renderer.write(ts, rng.gen_range(0..16), rng.gen());
            }
            assert_eq!(renderer.render_interleaved(chunk), 800);
        }
        output
    }
    let first = run(6280);
    assert!(first[..2 * 800].iter().any(|&s| s != 0));
    assert_eq!(first, run(6280));
    assert_eq!(run(6502), run(6502));
}

#[test]
fn sid_sawtooth_renders() {
    let sid = Sid::new(&SidConfig::default()).unwrap();
    let config = RendererConfig { host_rate: 44100, clock_rate: PAL_CLOCK_HZ, ..Default::default() };
    let mut renderer = ChipRenderer::new(sid, &config).unwrap();
    assert_eq!(renderer.voice_count(), 3);
    for &(addr, value) in &[(1, 0x10), (5, 0x00), (6, 0xF0), (4, 0x21), (0x18, 0x0F)] {
        renderer.write(0, addr, value);
    }
    let mut left = vec![0i16; 4410];
    let mut right = vec![0i16; 4410];
    assert_eq!(renderer.render(&mut left, &mut right), 4410);
    assert_eq!(left, right);
    let p2p = peak_to_peak(&left[441..]);
    assert!(p2p > 12000 && p2p < 20000, "{}", p2p);
    assert_eq!(renderer.chip().master_volume(), 0x0F);
    // the envelope of voice 3 is idle
    assert_eq!(renderer.read_register(0x1C), 0);
    renderer.set_voice_muted(0, true);
    assert!(renderer.is_voice_muted(0));
    renderer.render(&mut left, &mut right);
    assert!(left[441..].windows(2).all(|w| (i32::from(w[1]) - i32::from(w[0])).abs() <= 16));
}
