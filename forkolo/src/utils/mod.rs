pub(crate) mod rng;
pub(crate) use rng::Xoshiro256;
