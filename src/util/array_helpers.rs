use ndarray::{ArrayBase, Data, Dimension};

pub fn max<S, D>(arr: &ArrayBase<S, D>) -> f32
where
    S: Data<Elem = f32>,
    D: Dimension,
{
    arr.fold(f32::MIN, |out, i| if *i > out { *i } else { out })
}
