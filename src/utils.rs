use rand::Rng;

pub(crate) trait FisherYates {
    fn fisher_yates(&mut self, rng: &mut impl Rng);
}

impl<T> FisherYates for [T] {
    /// Uniform in-place shuffle: walking from the last index down, swap each
    /// element with one at a uniformly chosen index not above it.
    #[inline]
    fn fisher_yates(&mut self, rng: &mut impl Rng) {
        for i in (1..self.len()).rev() {
            let j = rng.gen_range(0..=i);
            self.swap(i, j);
        }
    }
}
