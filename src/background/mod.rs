pub mod bookkeeping;
