pub mod weatherxm;
